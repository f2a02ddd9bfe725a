//! Bridge identifier.

use crate::{MacAddress, ParseError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bridge priority used when none is configured.
pub const DEFAULT_BRIDGE_PRIORITY: u16 = 32768;

/// Identity of a bridge: operator priority plus its unique address.
///
/// The derived ordering compares `priority` first and `address` second, so a
/// lower priority always wins and the address only breaks ties.
///
/// # Examples
///
/// ```
/// use rstp_types::{BridgeId, MacAddress};
///
/// let a = BridgeId::new(0, MacAddress::from_u64(0xff));
/// let b = BridgeId::new(1, MacAddress::from_u64(0x01));
/// assert!(a < b);
///
/// let parsed: BridgeId = "32768.00:00:00:00:00:0a".parse().unwrap();
/// assert_eq!(parsed.to_string(), "32768.00:00:00:00:00:0a");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BridgeId {
    pub priority: u16,
    pub address: MacAddress,
}

impl BridgeId {
    pub const fn new(priority: u16, address: MacAddress) -> Self {
        Self { priority, address }
    }
}

impl fmt::Display for BridgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.priority, self.address)
    }
}

impl FromStr for BridgeId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (priority, address) = s
            .split_once('.')
            .ok_or_else(|| ParseError::InvalidBridgeId(s.to_string()))?;
        let priority = priority
            .parse::<u16>()
            .map_err(|_| ParseError::InvalidBridgeId(s.to_string()))?;
        let address = address
            .parse::<MacAddress>()
            .map_err(|_| ParseError::InvalidBridgeId(s.to_string()))?;
        Ok(Self::new(priority, address))
    }
}
