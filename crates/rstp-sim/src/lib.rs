//! Test fabric for the RSTP engine
//!
//! Provides:
//! - A deterministic discrete-event fabric wiring several engines together
//! - Topology fixtures (triangle, ring, seeded random mesh)
//! - Verification helpers for converged spanning trees

pub mod fabric;
pub mod fixtures;
mod verification;

pub use fabric::{
    Action, BridgeHandle, Endpoint, Fabric, FabricError, FlushRecord, TraceEntry,
    DEFAULT_LINK_DELAY,
};
pub use fixtures::{LinkSpec, Topology};
pub use verification::*;
