//! Virtual time, per-port timer state and the timer lookup table.
//!
//! The engine never reads a clock. Every event arrives with the instant at
//! which it happens, and timers are plain expiry instants stored next to the
//! state they guard. The scheduler only ever sees opaque [`TimerId`]s.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Add;
use std::time::Duration;

/// A point in virtual time, measured from an arbitrary epoch chosen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Instant(Duration);

impl Instant {
    pub const ZERO: Instant = Instant(Duration::ZERO);

    pub const fn from_duration(since_epoch: Duration) -> Self {
        Instant(since_epoch)
    }

    pub const fn from_millis(ms: u64) -> Self {
        Instant(Duration::from_millis(ms))
    }

    pub const fn since_epoch(&self) -> Duration {
        self.0
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later.
    pub fn saturating_duration_since(&self, earlier: Instant) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Instant {
        Instant(self.0 + rhs)
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.0.as_secs_f64())
    }
}

/// A one-shot timer held as data: idle, or running until an expiry instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Timer {
    expiry: Option<Instant>,
}

impl Timer {
    pub const fn idle() -> Self {
        Self { expiry: None }
    }

    /// Starts or restarts the timer.
    pub fn start(&mut self, now: Instant, duration: Duration) -> Instant {
        let expiry = now + duration;
        self.expiry = Some(expiry);
        expiry
    }

    pub fn stop(&mut self) {
        self.expiry = None;
    }

    pub const fn expiry(&self) -> Option<Instant> {
        self.expiry
    }

    pub const fn is_running(&self) -> bool {
        self.expiry.is_some()
    }

    /// True when running and due at or before `now`.
    pub fn has_expired(&self, now: Instant) -> bool {
        matches!(self.expiry, Some(expiry) if expiry <= now)
    }
}

/// Opaque handle the scheduler uses to refer to a pending timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimerId(u32);

impl TimerId {
    /// Rebuilds an identifier from its raw value, e.g. after a host stored it.
    pub const fn from_raw(raw: u32) -> Self {
        TimerId(raw)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// What a [`TimerId`] stands for inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Bridge-wide hello period.
    Hello,
    /// Bridge-wide wake-up at the earliest pending port upgrade.
    Upgrade,
    /// Topology-change window of one port.
    TcWhile(u16),
}

/// Bidirectional map between timer identifiers and their meaning.
///
/// Built once when the engine is constructed; ports are never added later, so
/// identifiers stay stable for the engine's lifetime.
#[derive(Debug, Clone)]
pub struct TimerTable {
    by_id: BTreeMap<TimerId, TimerKind>,
    hello: TimerId,
    upgrade: TimerId,
    tc_while: BTreeMap<u16, TimerId>,
}

impl TimerTable {
    pub fn new<I>(ports: I) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        let hello = TimerId(0);
        let upgrade = TimerId(1);
        let mut by_id = BTreeMap::from([(hello, TimerKind::Hello), (upgrade, TimerKind::Upgrade)]);
        let mut tc_while = BTreeMap::new();
        for port in ports {
            let id = TimerId(by_id.len() as u32);
            by_id.insert(id, TimerKind::TcWhile(port));
            tc_while.insert(port, id);
        }
        Self {
            by_id,
            hello,
            upgrade,
            tc_while,
        }
    }

    pub fn lookup(&self, id: TimerId) -> Option<TimerKind> {
        self.by_id.get(&id).copied()
    }

    pub fn hello(&self) -> TimerId {
        self.hello
    }

    pub fn upgrade(&self) -> TimerId {
        self.upgrade
    }

    pub fn tc_while(&self, port: u16) -> Option<TimerId> {
        self.tc_while.get(&port).copied()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
