//! Verification helpers for converged fabrics
//!
//! Provides assertion helpers over the roles and states of every engine in a
//! [`Fabric`]

use crate::fabric::{BridgeHandle, Endpoint, Fabric};
use rstp::{InvariantError, PortRole, PortState, RstpEngine};
use rstp_types::BridgeId;
use thiserror::Error;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Fabric has no bridges")]
    EmptyFabric,

    #[error("Bridge {bridge} not present in fabric")]
    MissingBridge { bridge: BridgeHandle },

    #[error("{bridge} believes the root is {actual}, expected {expected}")]
    RootMismatch {
        bridge: BridgeHandle,
        expected: BridgeId,
        actual: BridgeId,
    },

    #[error("{bridge} has {count} root ports")]
    RootPortCount { bridge: BridgeHandle, count: usize },

    #[error("{bridge} root port {port} is {state}")]
    RootPortBlocked {
        bridge: BridgeHandle,
        port: u16,
        state: PortState,
    },

    #[error("Link {a} <-> {b} has {count} designated ends")]
    DesignatedCount { a: Endpoint, b: Endpoint, count: usize },

    #[error("Active topology has {links} forwarding links for {bridges} bridges")]
    NotATree { links: usize, bridges: usize },

    #[error("Active topology does not reach {bridge}")]
    Unreachable { bridge: BridgeHandle },

    #[error("{bridge} inconsistent: {source}")]
    Invariant {
        bridge: BridgeHandle,
        source: InvariantError,
    },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Spanning tree verification helper
pub struct TopologyVerifier<'a> {
    fabric: &'a Fabric,
}

impl<'a> TopologyVerifier<'a> {
    /// Create a new verifier over `fabric`
    pub fn new(fabric: &'a Fabric) -> Self {
        Self { fabric }
    }

    fn engine(&self, bridge: BridgeHandle) -> VerifyResult<&'a RstpEngine> {
        self.fabric
            .engine(bridge)
            .ok_or(VerificationError::MissingBridge { bridge })
    }

    fn port_view(&self, end: Endpoint) -> VerifyResult<Option<(PortRole, PortState)>> {
        let engine = self.engine(end.bridge)?;
        Ok(engine.port(end.port).map(|port| (port.role(), port.state())))
    }

    /// Verify that every bridge agrees on one root, and return it
    pub fn assert_single_root(&self) -> VerifyResult<BridgeId> {
        let mut expected = None;
        for bridge in self.fabric.handles() {
            let actual = self.engine(bridge)?.root_vector().root_id();
            let first = *expected.get_or_insert(actual);
            if first != actual {
                return Err(VerificationError::RootMismatch {
                    bridge,
                    expected: first,
                    actual,
                });
            }
        }
        expected.ok_or(VerificationError::EmptyFabric)
    }

    /// Verify that every bridge elected `expected` as root
    pub fn assert_root_is(&self, expected: BridgeId) -> VerifyResult<()> {
        for bridge in self.fabric.handles() {
            let actual = self.engine(bridge)?.root_vector().root_id();
            if actual != expected {
                return Err(VerificationError::RootMismatch {
                    bridge,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Verify that the root has no root port and every other bridge exactly
    /// one, forwarding
    pub fn assert_root_ports(&self) -> VerifyResult<()> {
        for bridge in self.fabric.handles() {
            let engine = self.engine(bridge)?;
            let roots: Vec<_> = engine
                .ports()
                .filter(|port| port.role() == PortRole::Root)
                .collect();
            let is_root = engine.root_vector().root_id() == engine.bridge_id();
            let expected = if is_root { 0 } else { 1 };
            if roots.len() != expected {
                return Err(VerificationError::RootPortCount {
                    bridge,
                    count: roots.len(),
                });
            }
            if let Some(port) = roots.iter().find(|port| !port.is_forwarding()) {
                return Err(VerificationError::RootPortBlocked {
                    bridge,
                    port: port.number(),
                    state: port.state(),
                });
            }
        }
        Ok(())
    }

    /// Verify that every link has exactly one designated end
    pub fn assert_designated_per_link(&self) -> VerifyResult<()> {
        for (a, b) in self.fabric.links() {
            let count = [a, b]
                .into_iter()
                .map(|end| self.port_view(end))
                .collect::<VerifyResult<Vec<_>>>()?
                .into_iter()
                .filter(|view| matches!(view, Some((PortRole::Designated, _))))
                .count();
            if count != 1 {
                return Err(VerificationError::DesignatedCount { a, b, count });
            }
        }
        Ok(())
    }

    /// Links whose two ends both forward
    pub fn forwarding_links(&self) -> VerifyResult<Vec<(Endpoint, Endpoint)>> {
        let mut active = Vec::new();
        for (a, b) in self.fabric.links() {
            let forwarding = |view: Option<(PortRole, PortState)>| {
                matches!(view, Some((_, PortState::Forwarding)))
            };
            if forwarding(self.port_view(a)?) && forwarding(self.port_view(b)?) {
                active.push((a, b));
            }
        }
        Ok(active)
    }

    /// Verify that forwarding links form a tree spanning every bridge
    pub fn assert_spanning_tree(&self) -> VerifyResult<()> {
        let bridges = self.fabric.len();
        let active = self.forwarding_links()?;
        if bridges > 0 && active.len() != bridges - 1 {
            return Err(VerificationError::NotATree {
                links: active.len(),
                bridges,
            });
        }

        let mut parent: Vec<usize> = (0..bridges).collect();
        fn find(parent: &mut [usize], mut node: usize) -> usize {
            while parent[node] != node {
                parent[node] = parent[parent[node]];
                node = parent[node];
            }
            node
        }
        for (a, b) in &active {
            let (ra, rb) = (
                find(&mut parent, a.bridge.index()),
                find(&mut parent, b.bridge.index()),
            );
            if ra == rb {
                return Err(VerificationError::NotATree {
                    links: active.len(),
                    bridges,
                });
            }
            parent[ra] = rb;
        }
        for bridge in self.fabric.handles() {
            if find(&mut parent, bridge.index()) != find(&mut parent, 0) {
                return Err(VerificationError::Unreachable { bridge });
            }
        }
        Ok(())
    }

    /// Verify each engine's own structural invariants
    pub fn assert_invariants(&self) -> VerifyResult<()> {
        for bridge in self.fabric.handles() {
            self.engine(bridge)?
                .check_invariants()
                .map_err(|source| VerificationError::Invariant { bridge, source })?;
        }
        Ok(())
    }

    /// All of the above; returns the agreed root
    pub fn assert_converged(&self) -> VerifyResult<BridgeId> {
        self.assert_invariants()?;
        let root = self.assert_single_root()?;
        self.assert_root_ports()?;
        self.assert_designated_per_link()?;
        self.assert_spanning_tree()?;
        Ok(root)
    }
}
