//! Port identifier.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Highest usable port number (12-bit field on the wire).
pub const MAX_PORT_NUMBER: u16 = 4095;

/// Highest usable port priority.
pub const MAX_PORT_PRIORITY: u16 = 240;

/// Port priority used when none is configured.
pub const DEFAULT_PORT_PRIORITY: u16 = 128;

/// Identity of a bridge port: priority, then port number.
///
/// Used as the final tie-break of a priority vector; two ports of the same
/// bridge attached to one segment are told apart here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortId {
    pub priority: u16,
    pub number: u16,
}

impl PortId {
    pub const fn new(priority: u16, number: u16) -> Self {
        Self { priority, number }
    }

    /// Creates a port identifier, rejecting values outside the protocol range.
    pub fn checked(priority: u16, number: u16) -> Result<Self, ParseError> {
        let id = Self::new(priority, number);
        id.validate()?;
        Ok(id)
    }

    /// Checks that priority and number fit the ranges a bridge may advertise.
    pub fn validate(&self) -> Result<(), ParseError> {
        if self.number == 0 || self.number > MAX_PORT_NUMBER {
            return Err(ParseError::PortNumberOutOfRange(self.number));
        }
        if self.priority > MAX_PORT_PRIORITY {
            return Err(ParseError::PortPriorityOutOfRange(self.priority));
        }
        Ok(())
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.priority, self.number)
    }
}

impl FromStr for PortId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (priority, number) = s
            .split_once('.')
            .ok_or_else(|| ParseError::InvalidPortId(s.to_string()))?;
        let priority = priority
            .parse::<u16>()
            .map_err(|_| ParseError::InvalidPortId(s.to_string()))?;
        let number = number
            .parse::<u16>()
            .map_err(|_| ParseError::InvalidPortId(s.to_string()))?;
        Self::checked(priority, number)
    }
}
