//! Hardware address type for BLE advertisers.
//!
//! Addresses are stored as six octets in display order (most significant
//! octet first), independent of any Bluetooth library.

use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use thiserror::Error;

/// A Bluetooth device address stored as a compact 6-byte array.
///
/// Ordering is lexicographic over the octets, which matches the ordering of
/// the canonical upper-case `AA:BB:CC:DD:EE:FF` rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// The most significant octet, which carries the address-type bits.
    pub fn first_octet(&self) -> u8 {
        self.0[0]
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Errors returned for a malformed hardware address.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidAddressFormat {
    #[error("invalid address: expected 6 octets, got {0}")]
    OctetCount(usize),
    #[error("invalid address: octet {0} has wrong length")]
    OctetLength(usize),
    #[error("invalid address: '{0}' is not valid hex")]
    NotHex(String),
}

impl FromStr for MacAddress {
    type Err = InvalidAddressFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(InvalidAddressFormat::OctetCount(parts.len()));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return Err(InvalidAddressFormat::OctetLength(i));
            }
            // from_str_radix accepts a leading '+', which is not hex
            if !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(InvalidAddressFormat::NotHex(part.to_string()));
            }
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| InvalidAddressFormat::NotHex(part.to_string()))?;
        }

        Ok(MacAddress(bytes))
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for MacAddress {
    type Error = InvalidAddressFormat;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        <[u8; 6]>::try_from(bytes)
            .map(Self)
            .map_err(|_| InvalidAddressFormat::OctetCount(bytes.len()))
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for MacAddress {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}

#[cfg(feature = "bluer")]
impl From<MacAddress> for bluer::Address {
    fn from(addr: MacAddress) -> Self {
        bluer::Address(addr.0)
    }
}
