//! A single received advertisement.

use crate::mac_address::MacAddress;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// One advertisement as reported by a scanner backend.
///
/// `timestamp_nanos` is monotonic and relative to the backend's scan epoch;
/// only differences between timestamps are meaningful.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Advertiser address
    pub address: MacAddress,
    /// Received signal strength in dBm
    pub rssi: i16,
    /// Monotonic capture time in nanoseconds
    pub timestamp_nanos: u64,
    /// AD type 0x01 flags byte, if the advertisement carried one
    pub advertising_flags: Option<u8>,
    /// Legacy (true) or extended (false) advertising PDU
    pub is_legacy: bool,
    /// Local name (AD type 0x08/0x09), if advertised
    pub name: Option<String>,
    /// Advertised service UUIDs, expanded to 128 bits
    pub service_uuids: BTreeSet<Uuid>,
    /// Manufacturer specific payloads keyed by company identifier
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
}

impl Observation {
    /// An observation carrying only the fields the aggregation needs.
    pub fn new(address: MacAddress, rssi: i16, timestamp_nanos: u64) -> Self {
        Self {
            address,
            rssi,
            timestamp_nanos,
            advertising_flags: None,
            is_legacy: true,
            name: None,
            service_uuids: BTreeSet::new(),
            manufacturer_data: BTreeMap::new(),
        }
    }
}
