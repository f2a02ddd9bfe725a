//! Priority vectors and the graded comparison that ranks them.
//!
//! A [`PriorityVector`] is a claim about the best path to the root as seen
//! through one port. Lower vectors are better. [`compare`] reports not only
//! which side wins but at which field the two vectors first differ, because
//! callers react differently to a new root than to a cheaper path or a port
//! tie-break.

use rstp_types::{BridgeId, ParseError, PortId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Reasons an inbound vector is rejected before it reaches the comparator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VectorError {
    #[error("invalid designated port: {0}")]
    InvalidPort(#[from] ParseError),
    #[error("bridge {bridge} claims to be root with non-zero path cost {cost}")]
    InconsistentRootClaim { bridge: BridgeId, cost: u32 },
}

/// Root identifier, root path cost, designated bridge and designated port, in
/// order of significance.
///
/// The derived `Ord` is the lexicographic order over the four fields, which is
/// exactly the spanning-tree selection rule. Vectors are never edited in place;
/// the `with_*` helpers return a new value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PriorityVector {
    root_id: BridgeId,
    root_path_cost: u32,
    designated_bridge_id: BridgeId,
    designated_port_id: PortId,
}

impl PriorityVector {
    pub const fn new(
        root_id: BridgeId,
        root_path_cost: u32,
        designated_bridge_id: BridgeId,
        designated_port_id: PortId,
    ) -> Self {
        Self {
            root_id,
            root_path_cost,
            designated_bridge_id,
            designated_port_id,
        }
    }

    /// The vector of a bridge claiming to be root itself.
    ///
    /// Port identity is all zeros so the claim beats any vector the same
    /// bridge could advertise on a real port.
    pub const fn bridge_as_root(bridge: BridgeId) -> Self {
        Self::new(bridge, 0, bridge, PortId::new(0, 0))
    }

    pub const fn root_id(&self) -> BridgeId {
        self.root_id
    }

    pub const fn root_path_cost(&self) -> u32 {
        self.root_path_cost
    }

    pub const fn designated_bridge_id(&self) -> BridgeId {
        self.designated_bridge_id
    }

    pub const fn designated_port_id(&self) -> PortId {
        self.designated_port_id
    }

    /// Returns the vector as seen one hop further away, across a link of
    /// `cost`.
    pub const fn with_added_cost(&self, cost: u32) -> Self {
        Self {
            root_path_cost: self.root_path_cost.saturating_add(cost),
            ..*self
        }
    }

    /// Projects this root vector onto one of our own ports: same root and
    /// cost, with `bridge`/`port` substituted as the designated pair.
    pub const fn designated_for(&self, bridge: BridgeId, port: PortId) -> Self {
        Self::new(self.root_id, self.root_path_cost, bridge, port)
    }

    /// True when `bridge` sent this vector.
    pub fn is_from(&self, bridge: BridgeId) -> bool {
        self.designated_bridge_id == bridge
    }

    /// Rejects vectors no conforming bridge could have produced.
    pub fn validate(&self) -> Result<(), VectorError> {
        self.designated_port_id.validate()?;
        if self.root_id == self.designated_bridge_id && self.root_path_cost != 0 {
            return Err(VectorError::InconsistentRootClaim {
                bridge: self.root_id,
                cost: self.root_path_cost,
            });
        }
        Ok(())
    }

    /// Graded comparison of `self` against `other`; see [`compare`].
    pub fn compare(&self, other: &PriorityVector) -> CompareResult {
        compare(self, other)
    }
}

impl fmt::Display for PriorityVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{root={} cost={} bridge={} port={}}}",
            self.root_id, self.root_path_cost, self.designated_bridge_id, self.designated_port_id
        )
    }
}

/// Field at which two vectors first differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VectorField {
    Root,
    PathCost,
    DesignatedBridge,
    DesignatedPort,
}

/// Outcome of [`compare`].
///
/// `Better*` means the left-hand vector is preferable. The discriminants keep
/// the sign convention: positive is better, and the magnitude grows as the
/// deciding field becomes less significant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i8)]
pub enum CompareResult {
    WorsePort = -4,
    WorseSource = -3,
    WorseRpc = -2,
    WorseRoot = -1,
    Equal = 0,
    BetterRoot = 1,
    BetterRpc = 2,
    BetterSource = 3,
    BetterPort = 4,
}

impl CompareResult {
    pub const fn is_better(self) -> bool {
        (self as i8) > 0
    }

    pub const fn is_worse(self) -> bool {
        (self as i8) < 0
    }

    pub const fn is_better_or_equal(self) -> bool {
        !self.is_worse()
    }

    /// The result the comparison yields with its operands swapped.
    pub const fn inverse(self) -> Self {
        match self {
            Self::WorsePort => Self::BetterPort,
            Self::WorseSource => Self::BetterSource,
            Self::WorseRpc => Self::BetterRpc,
            Self::WorseRoot => Self::BetterRoot,
            Self::Equal => Self::Equal,
            Self::BetterRoot => Self::WorseRoot,
            Self::BetterRpc => Self::WorseRpc,
            Self::BetterSource => Self::WorseSource,
            Self::BetterPort => Self::WorsePort,
        }
    }

    /// The deciding field, or `None` for [`CompareResult::Equal`].
    pub const fn field(self) -> Option<VectorField> {
        match self {
            Self::WorseRoot | Self::BetterRoot => Some(VectorField::Root),
            Self::WorseRpc | Self::BetterRpc => Some(VectorField::PathCost),
            Self::WorseSource | Self::BetterSource => Some(VectorField::DesignatedBridge),
            Self::WorsePort | Self::BetterPort => Some(VectorField::DesignatedPort),
            Self::Equal => None,
        }
    }

    fn graded(ordering: Ordering, field: VectorField) -> Option<Self> {
        let (better, worse) = match field {
            VectorField::Root => (Self::BetterRoot, Self::WorseRoot),
            VectorField::PathCost => (Self::BetterRpc, Self::WorseRpc),
            VectorField::DesignatedBridge => (Self::BetterSource, Self::WorseSource),
            VectorField::DesignatedPort => (Self::BetterPort, Self::WorsePort),
        };
        match ordering {
            Ordering::Less => Some(better),
            Ordering::Greater => Some(worse),
            Ordering::Equal => None,
        }
    }
}

/// Compares `a` against `b`, most significant field first.
///
/// There is no special case for vectors sourced by the local bridge: a frame
/// looping back to another local port loses on port identity like any other.
pub fn compare(a: &PriorityVector, b: &PriorityVector) -> CompareResult {
    CompareResult::graded(a.root_id.cmp(&b.root_id), VectorField::Root)
        .or_else(|| {
            CompareResult::graded(
                a.root_path_cost.cmp(&b.root_path_cost),
                VectorField::PathCost,
            )
        })
        .or_else(|| {
            CompareResult::graded(
                a.designated_bridge_id.cmp(&b.designated_bridge_id),
                VectorField::DesignatedBridge,
            )
        })
        .or_else(|| {
            CompareResult::graded(
                a.designated_port_id.cmp(&b.designated_port_id),
                VectorField::DesignatedPort,
            )
        })
        .unwrap_or(CompareResult::Equal)
}
