//! Engine counters and state snapshots.

use crate::port::{PortRole, PortState};
use crate::timer::Instant;
use crate::vector::PriorityVector;
use rstp_types::BridgeId;
use serde::Serialize;

/// Engine statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RstpStats {
    pub vectors_received: u64,
    pub vectors_sent: u64,
    pub vectors_dropped: u64,
    pub role_changes: u64,
    pub topology_changes: u64,
    pub tc_received: u64,
    pub flushes: u64,
    pub root_changes: u64,
    pub aged_out: u64,
}

/// Point-in-time view of one port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortSnapshot {
    pub number: u16,
    pub role: PortRole,
    pub state: PortState,
    pub edge: bool,
    pub best_received: Option<PriorityVector>,
    pub tc_while: Option<Instant>,
}

/// Point-in-time view of the whole bridge, ports in ascending number order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineSnapshot {
    pub bridge_id: BridgeId,
    pub root_vector: PriorityVector,
    pub root_port: Option<u16>,
    pub ports: Vec<PortSnapshot>,
}

impl EngineSnapshot {
    pub fn port(&self, number: u16) -> Option<&PortSnapshot> {
        self.ports.iter().find(|port| port.number == number)
    }

    pub fn is_root_bridge(&self) -> bool {
        self.root_port.is_none()
    }
}
