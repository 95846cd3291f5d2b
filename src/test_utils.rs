use crate::mac_address::MacAddress;
use crate::observation::Observation;

/// A stable address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// A second address that sorts before [`TEST_MAC`].
pub const OTHER_MAC: MacAddress = MacAddress([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);

/// Nanoseconds per millisecond.
pub const MS: u64 = 1_000_000;

/// Build an `Observation` at `millis` with a fixed RSSI and no payload.
///
/// Tests can override just the fields they care about.
pub fn observation_at(mac: MacAddress, millis: u64) -> Observation {
    Observation::new(mac, -60, millis * MS)
}
