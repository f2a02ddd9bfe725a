//! Identity types for the Rapid Spanning Tree engine.
//!
//! Every spanning-tree decision reduces to comparing identifiers, so the
//! orderings defined here are load-bearing:
//!
//! - [`MacAddress`]: 48-bit bridge address, ordered numerically
//! - [`BridgeId`]: bridge priority followed by address (lower wins)
//! - [`PortId`]: port priority followed by port number (lower wins)

mod bridge;
mod mac;
mod port;

pub use bridge::{BridgeId, DEFAULT_BRIDGE_PRIORITY};
pub use mac::MacAddress;
pub use port::{PortId, DEFAULT_PORT_PRIORITY, MAX_PORT_NUMBER, MAX_PORT_PRIORITY};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid bridge identifier: {0}")]
    InvalidBridgeId(String),

    #[error("invalid port identifier: {0}")]
    InvalidPortId(String),

    #[error("port number {0} out of range (must be 1-{MAX_PORT_NUMBER})")]
    PortNumberOutOfRange(u16),

    #[error("port priority {0} out of range (must be 0-{MAX_PORT_PRIORITY})")]
    PortPriorityOutOfRange(u16),
}
