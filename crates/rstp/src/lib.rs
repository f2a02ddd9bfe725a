//! Rapid Spanning Tree decision engine.
//!
//! [`RstpEngine`] holds the protocol state of one bridge and reacts to
//! [`RstpEvent`]s: received priority vectors, timer expiries and link
//! changes. It elects a root bridge, assigns every port a role and walks
//! designated ports to forwarding, reporting its decisions through the
//! [`Transport`], [`Scheduler`] and [`MacTable`] capabilities supplied by the
//! host.
//!
//! The engine is synchronous and deterministic: the host passes the current
//! time with every event, and identical event sequences produce identical
//! outputs.

pub mod collaborators;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod port;
pub mod stats;
pub mod timer;
pub mod vector;

pub use collaborators::{Collaborators, MacTable, Scheduler, Transport};
pub use config::{BridgeConfig, PortConfig, RstpConfig, TimerConfig, MAX_LINK_COST};
pub use engine::{RstpEngine, MAX_LOST_HELLOS};
pub use error::{InvariantError, RstpError, RstpResult};
pub use event::{RstpEvent, TcFlags};
pub use port::{PortRecord, PortRole, PortState};
pub use stats::{EngineSnapshot, PortSnapshot, RstpStats};
pub use timer::{Instant, Timer, TimerId, TimerKind, TimerTable};
pub use vector::{compare, CompareResult, PriorityVector, VectorError, VectorField};

pub use rstp_types::{BridgeId, MacAddress, PortId};
