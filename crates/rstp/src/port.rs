//! Per-port protocol state.

use crate::config::PortConfig;
use crate::timer::Timer;
use crate::vector::PriorityVector;
use rstp_types::PortId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Spanning-tree role of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortRole {
    Disabled,
    Alternate,
    Backup,
    Root,
    Designated,
}

impl PortRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Alternate => "alternate",
            Self::Backup => "backup",
            Self::Root => "root",
            Self::Designated => "designated",
        }
    }

    /// Roles that never forward traffic.
    pub const fn is_standby(&self) -> bool {
        matches!(self, Self::Alternate | Self::Backup)
    }
}

impl fmt::Display for PortRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Forwarding state of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Discarding,
    Learning,
    Forwarding,
}

impl PortState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discarding => "discarding",
            Self::Learning => "learning",
            Self::Forwarding => "forwarding",
        }
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the engine knows about one port.
#[derive(Debug, Clone)]
pub struct PortRecord {
    pub(crate) id: PortId,
    pub(crate) link_cost: u32,
    /// Administratively configured edge port.
    pub(crate) admin_edge: bool,
    /// Operating as an edge port (configured, or detected by auto-edge).
    pub(crate) oper_edge: bool,
    /// Peer is known not to speak the rapid protocol.
    pub(crate) legacy: bool,

    pub(crate) role: PortRole,
    pub(crate) state: PortState,
    pub(crate) best_received: Option<PriorityVector>,
    pub(crate) designated_vector: Option<PriorityVector>,

    /// Set once any vector arrives after link up.
    pub(crate) peer_seen: bool,
    /// Still inside the provisional period that follows link up.
    pub(crate) migrating: bool,
    /// Hellos elapsed since `best_received` was last refreshed.
    pub(crate) lost_hellos: u32,
    /// Acknowledge a topology change heard on this port.
    pub(crate) tc_ack: bool,

    pub(crate) migration_delay: Timer,
    pub(crate) tc_while: Timer,
}

impl PortRecord {
    pub(crate) fn new(config: &PortConfig) -> Self {
        Self {
            id: PortId::new(config.priority, config.number),
            link_cost: config.link_cost,
            admin_edge: config.edge,
            oper_edge: config.edge,
            legacy: config.legacy,
            role: PortRole::Disabled,
            state: PortState::Discarding,
            best_received: None,
            designated_vector: None,
            peer_seen: false,
            migrating: false,
            lost_hellos: 0,
            tc_ack: false,
            migration_delay: Timer::idle(),
            tc_while: Timer::idle(),
        }
    }

    /// Drops all dynamic state, leaving the port `Disabled`/`Discarding`.
    ///
    /// The caller is responsible for cancelling any timer the scheduler still
    /// holds for this port.
    pub(crate) fn reset(&mut self) {
        self.oper_edge = self.admin_edge;
        self.role = PortRole::Disabled;
        self.state = PortState::Discarding;
        self.best_received = None;
        self.designated_vector = None;
        self.peer_seen = false;
        self.migrating = false;
        self.lost_hellos = 0;
        self.tc_ack = false;
        self.migration_delay.stop();
        self.tc_while.stop();
    }

    /// Stores freshly heard information and restarts its aging.
    pub(crate) fn record(&mut self, vector: PriorityVector) {
        self.best_received = Some(vector);
        self.lost_hellos = 0;
    }

    pub fn number(&self) -> u16 {
        self.id.number
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn role(&self) -> PortRole {
        self.role
    }

    pub fn state(&self) -> PortState {
        self.state
    }

    pub fn link_cost(&self) -> u32 {
        self.link_cost
    }

    pub fn is_edge(&self) -> bool {
        self.oper_edge
    }

    pub fn is_enabled(&self) -> bool {
        self.role != PortRole::Disabled
    }

    pub fn is_forwarding(&self) -> bool {
        self.state == PortState::Forwarding
    }

    pub fn best_received(&self) -> Option<&PriorityVector> {
        self.best_received.as_ref()
    }

    /// The vector last advertised (or to be advertised) while designated.
    pub fn designated_vector(&self) -> Option<&PriorityVector> {
        self.designated_vector.as_ref()
    }

    pub fn migration_delay(&self) -> &Timer {
        &self.migration_delay
    }

    pub fn tc_while(&self) -> &Timer {
        &self.tc_while
    }

    pub fn tc_ack(&self) -> bool {
        self.tc_ack
    }

    /// Root path vector through this port: the stored information one link
    /// cost further from the root.
    pub fn root_path_vector(&self) -> Option<PriorityVector> {
        self.best_received
            .map(|vector| vector.with_added_cost(self.link_cost))
    }

    /// Whether a role/state pair is one the port may legally hold.
    pub fn is_consistent(&self) -> bool {
        match self.role {
            role if role.is_standby() => self.state == PortState::Discarding,
            PortRole::Disabled => self.state == PortState::Discarding,
            PortRole::Root => self.state == PortState::Forwarding,
            _ => true,
        }
    }
}
