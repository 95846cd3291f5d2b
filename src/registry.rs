//! Per-device aggregation of advertisements.
//!
//! The registry folds each [`Observation`] into one [`AggregatedDevice`] per
//! address, keeping the full timestamp history sorted so the interval
//! estimate can be recomputed from scratch after every merge.

use crate::address_type::AddressType;
use crate::interval::{self, INSUFFICIENT_DATA};
use crate::mac_address::{InvalidAddressFormat, MacAddress};
use crate::observation::Observation;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use uuid::Uuid;

/// Everything known about one advertiser within a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedDevice {
    pub address: MacAddress,
    pub last_flags: Option<u8>,
    pub last_legacy: bool,
    /// Most recent advertised name; kept when later advertisements omit it
    pub last_name: Option<String>,
    pub last_uuids: BTreeSet<Uuid>,
    pub last_rssi: i16,
    pub last_manufacturer_data: BTreeMap<u16, Vec<u8>>,
    /// Number of observations merged so far, always `timestamps.len()`
    pub observation_count: usize,
    /// Every merged capture timestamp, ascending
    pub timestamps: Vec<u64>,
    /// Earliest merged timestamp
    pub first_timestamp: u64,
    /// Latest interval estimate, [`INSUFFICIENT_DATA`] while unknown
    pub estimated_interval_nanos: u64,
}

impl AggregatedDevice {
    fn new(observation: Observation) -> Self {
        Self {
            address: observation.address,
            last_flags: observation.advertising_flags,
            last_legacy: observation.is_legacy,
            last_name: observation.name,
            last_uuids: observation.service_uuids,
            last_rssi: observation.rssi,
            last_manufacturer_data: observation.manufacturer_data,
            observation_count: 1,
            timestamps: vec![observation.timestamp_nanos],
            first_timestamp: observation.timestamp_nanos,
            estimated_interval_nanos: INSUFFICIENT_DATA,
        }
    }

    fn absorb(&mut self, observation: Observation) {
        let at = self
            .timestamps
            .partition_point(|&t| t <= observation.timestamp_nanos);
        self.timestamps.insert(at, observation.timestamp_nanos);
        self.observation_count += 1;
        self.first_timestamp = self.first_timestamp.min(observation.timestamp_nanos);

        self.last_flags = observation.advertising_flags;
        self.last_legacy = observation.is_legacy;
        if observation.name.is_some() {
            self.last_name = observation.name;
        }
        self.last_uuids = observation.service_uuids;
        self.last_rssi = observation.rssi;
        self.last_manufacturer_data = observation.manufacturer_data;

        self.estimated_interval_nanos = interval::estimate_sorted(&self.timestamps);
    }

    /// The estimated advertising interval, `None` while there is not enough data.
    pub fn advertising_interval(&self) -> Option<Duration> {
        interval::as_duration(self.estimated_interval_nanos)
    }

    pub fn address_type(&self) -> AddressType {
        AddressType::of(&self.address)
    }
}

/// Keyed collection of aggregated devices, enumerated in ascending address order.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<MacAddress, AggregatedDevice>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold an observation into the record for its address, creating it if needed.
    pub fn merge(&mut self, observation: Observation) -> &AggregatedDevice {
        use std::collections::btree_map::Entry;

        match self.devices.entry(observation.address) {
            Entry::Vacant(entry) => {
                log::debug!("new device {}", observation.address);
                entry.insert(AggregatedDevice::new(observation))
            }
            Entry::Occupied(entry) => {
                let device = entry.into_mut();
                device.absorb(observation);
                device
            }
        }
    }

    /// Look up a device by its textual address.
    ///
    /// # Errors
    /// Returns [`InvalidAddressFormat`] if `address` is malformed.
    pub fn get(&self, address: &str) -> Result<Option<&AggregatedDevice>, InvalidAddressFormat> {
        let address: MacAddress = address.parse()?;
        Ok(self.devices.get(&address))
    }

    /// A copy of every device, ascending by address.
    pub fn snapshot(&self) -> Vec<AggregatedDevice> {
        self.devices.values().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
