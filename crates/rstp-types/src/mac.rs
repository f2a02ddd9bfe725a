//! Bridge MAC address with parsing, formatting and numeric ordering.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 48-bit Ethernet MAC address.
///
/// Addresses order the same way their 48-bit integer values do, which is the
/// tie-break the spanning tree applies between bridges of equal priority.
///
/// # Examples
///
/// ```
/// use rstp_types::MacAddress;
///
/// let low: MacAddress = "00:00:00:00:00:01".parse().unwrap();
/// let high: MacAddress = "00-00-00-00-01-00".parse().unwrap();
/// assert!(low < high);
/// assert_eq!(high.to_string(), "00:00:00:00:01:00");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// The zero/null MAC address (00:00:00:00:00:00).
    pub const ZERO: MacAddress = MacAddress([0, 0, 0, 0, 0, 0]);

    /// Creates a new MAC address from raw bytes.
    pub const fn new(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }

    /// Builds an address from the low 48 bits of `value`.
    pub const fn from_u64(value: u64) -> Self {
        MacAddress([
            (value >> 40) as u8,
            (value >> 32) as u8,
            (value >> 24) as u8,
            (value >> 16) as u8,
            (value >> 8) as u8,
            value as u8,
        ])
    }

    /// Returns the address as a 48-bit integer.
    pub const fn to_u64(&self) -> u64 {
        ((self.0[0] as u64) << 40)
            | ((self.0[1] as u64) << 32)
            | ((self.0[2] as u64) << 24)
            | ((self.0[3] as u64) << 16)
            | ((self.0[4] as u64) << 8)
            | (self.0[5] as u64)
    }

    /// Returns the raw bytes of the MAC address.
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Returns true if this is a multicast address.
    ///
    /// A bridge identifier must never carry one.
    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// Returns true if this is the zero address.
    pub const fn is_zero(&self) -> bool {
        self.to_u64() == 0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Support both colon and hyphen separators
        let separator = if s.contains(':') { ':' } else { '-' };

        let parts: Vec<&str> = s.split(separator).collect();
        if parts.len() != 6 {
            return Err(ParseError::InvalidMacAddress(s.to_string()));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() || part.len() > 2 {
                return Err(ParseError::InvalidMacAddress(s.to_string()));
            }
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| ParseError::InvalidMacAddress(s.to_string()))?;
        }

        Ok(MacAddress(bytes))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> String {
        mac.to_string()
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_colon_and_hyphen() {
        let colon: MacAddress = "00:11:22:33:44:55".parse().unwrap();
        let hyphen: MacAddress = "00-11-22-33-44-55".parse().unwrap();
        assert_eq!(colon, hyphen);
        assert_eq!(colon.as_bytes(), &[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    }

    #[test]
    fn test_u64_conversion() {
        let mac = MacAddress::from_u64(0x0011_2233_4455);
        assert_eq!(mac.to_string(), "00:11:22:33:44:55");
        assert_eq!(mac.to_u64(), 0x0011_2233_4455);
        // Bits above 48 are discarded
        assert_eq!(MacAddress::from_u64(0xffff_0000_0000_0001).to_u64(), 1);
    }

    #[test]
    fn test_ordering_is_numeric() {
        let a = MacAddress::from_u64(0x0000_0000_00ff);
        let b = MacAddress::from_u64(0x0000_0000_0100);
        assert!(a < b);
        assert!(MacAddress::ZERO < a);
    }

    #[test]
    fn test_multicast_and_zero() {
        let multicast: MacAddress = "01:80:c2:00:00:00".parse().unwrap();
        assert!(multicast.is_multicast());
        assert!(!multicast.is_zero());
        assert!(MacAddress::ZERO.is_zero());
    }

    #[test]
    fn test_invalid_format() {
        assert!("invalid".parse::<MacAddress>().is_err());
        assert!("00:11:22:33:44".parse::<MacAddress>().is_err());
        assert!("00:11:22:33:44:55:66".parse::<MacAddress>().is_err());
        assert!("gg:11:22:33:44:55".parse::<MacAddress>().is_err());
        assert!("000:11:22:33:44:55".parse::<MacAddress>().is_err());
    }
}
