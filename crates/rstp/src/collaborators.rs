//! Capabilities the engine needs from its host.
//!
//! All three are one-way notifications: the engine never waits on them and
//! never looks at a result.

use crate::event::TcFlags;
use crate::timer::{Instant, TimerId};
use crate::vector::PriorityVector;
use std::sync::Arc;

/// Sends encoded BPDUs out of a port.
pub trait Transport: Send + Sync {
    fn send_vector(&self, port: u16, vector: PriorityVector, flags: TcFlags);
}

/// Delivers `RstpEvent::TimerExpired` back to the engine.
pub trait Scheduler: Send + Sync {
    /// Arms `timer` to fire at `at`. Arming an already pending timer moves it.
    fn schedule_at(&self, at: Instant, timer: TimerId);
    /// Disarms `timer`; a no-op when it is not pending.
    fn cancel(&self, timer: TimerId);
}

/// The MAC learning table of the bridge.
pub trait MacTable: Send + Sync {
    /// Discards addresses learned on `port`.
    fn flush(&self, port: u16);
}

/// The set of collaborators handed to the engine at construction.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub scheduler: Arc<dyn Scheduler>,
    pub mac_table: Arc<dyn MacTable>,
}

impl Collaborators {
    pub fn new(
        transport: Arc<dyn Transport>,
        scheduler: Arc<dyn Scheduler>,
        mac_table: Arc<dyn MacTable>,
    ) -> Self {
        Self {
            transport,
            scheduler,
            mac_table,
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
