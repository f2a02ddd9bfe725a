//! Events consumed by [`crate::RstpEngine::handle_event`].

use crate::timer::TimerId;
use crate::vector::PriorityVector;
use serde::{Deserialize, Serialize};

/// Topology-change flags carried alongside a vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TcFlags {
    /// Sender detected or is propagating a topology change.
    pub topology_change: bool,
    /// Sender acknowledges a topology change it received from us.
    pub topology_change_ack: bool,
}

impl TcFlags {
    pub const NONE: TcFlags = TcFlags {
        topology_change: false,
        topology_change_ack: false,
    };

    pub const fn tc() -> Self {
        Self {
            topology_change: true,
            topology_change_ack: false,
        }
    }

    pub const fn ack() -> Self {
        Self {
            topology_change: false,
            topology_change_ack: true,
        }
    }
}

/// Everything that can happen to a bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RstpEvent {
    /// A decoded BPDU arrived on `port`.
    VectorArrived {
        port: u16,
        vector: PriorityVector,
        flags: TcFlags,
    },
    /// A timer previously handed to the scheduler fired.
    TimerExpired { timer: TimerId },
    /// Carrier detected on `port`.
    LinkUp { port: u16 },
    /// Carrier lost on `port`.
    LinkDown { port: u16 },
}

impl RstpEvent {
    /// Port the event concerns, if any.
    pub fn port(&self) -> Option<u16> {
        match self {
            Self::VectorArrived { port, .. } | Self::LinkUp { port } | Self::LinkDown { port } => {
                Some(*port)
            }
            Self::TimerExpired { .. } => None,
        }
    }
}
