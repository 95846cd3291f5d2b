//! Address-type classification.
//!
//! BLE devices advertise with either a public (IEEE-assigned) address or one
//! of the random address forms. The form is carried by the two most
//! significant bits of the most significant octet.

use crate::mac_address::{InvalidAddressFormat, MacAddress};
use std::fmt;

/// The kind of hardware address a device advertises with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressType {
    /// Top bits `11`
    RandomStatic,
    /// Top bits `01`
    ResolvablePrivate,
    /// Top bits `00`
    NonResolvablePrivate,
    /// Top bits `10`
    Public,
}

impl AddressType {
    /// Classify an already parsed address.
    pub fn of(address: &MacAddress) -> Self {
        match address.first_octet() >> 6 {
            0b11 => AddressType::RandomStatic,
            0b01 => AddressType::ResolvablePrivate,
            0b00 => AddressType::NonResolvablePrivate,
            _ => AddressType::Public,
        }
    }

    /// Short machine-friendly name, used as a tag value.
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressType::RandomStatic => "random_static",
            AddressType::ResolvablePrivate => "resolvable_private",
            AddressType::NonResolvablePrivate => "non_resolvable_private",
            AddressType::Public => "public",
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AddressType::RandomStatic => "Random Static Address",
            AddressType::ResolvablePrivate => "Resolvable Private Address",
            AddressType::NonResolvablePrivate => "Non-Resolvable Private Address",
            AddressType::Public => "Public Address",
        };
        f.write_str(label)
    }
}

impl From<MacAddress> for AddressType {
    fn from(address: MacAddress) -> Self {
        AddressType::of(&address)
    }
}

/// Classify a textual `AA:BB:CC:DD:EE:FF` address.
///
/// # Errors
/// Returns [`InvalidAddressFormat`] when the address does not have six
/// two-digit hex octets.
///
/// # Example
/// ```
/// use beacon_scan::address_type::{AddressType, classify};
///
/// assert_eq!(classify("C0:00:00:00:00:01").unwrap(), AddressType::RandomStatic);
/// assert!(classify("C0:00:00").is_err());
/// ```
pub fn classify(address: &str) -> Result<AddressType, InvalidAddressFormat> {
    address.parse::<MacAddress>().map(AddressType::from)
}
