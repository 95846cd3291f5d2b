//! BLE advertisement scanning.
//!
//! This module provides a common interface over different Bluetooth
//! scanning backends. Each backend turns received advertisements into
//! [`Observation`]s and sends them through a bounded channel to a single
//! consumer.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use crate::observation::Observation;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Error types for decoding received advertisements.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Report or AD structure shorter than its declared length
    #[error("Truncated data: {0}")]
    Truncated(String),
    /// Structurally invalid data
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Convenience alias for observations or decode errors.
pub type ObservationResult = Result<Observation, DecodeError>;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Data decoding error
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    /// Backend not available (not compiled in)
    #[allow(dead_code)]
    #[error("Backend '{0}' not available (not compiled in)")]
    BackendNotAvailable(String),
}

/// Channel buffer size for observations.
pub const OBSERVATION_CHANNEL_BUFFER_SIZE: usize = 100;

// AD types
const AD_TYPE_FLAGS: u8 = 0x01;
const AD_TYPE_UUID16_INCOMPLETE: u8 = 0x02;
const AD_TYPE_UUID16_COMPLETE: u8 = 0x03;
const AD_TYPE_UUID32_INCOMPLETE: u8 = 0x04;
const AD_TYPE_UUID32_COMPLETE: u8 = 0x05;
const AD_TYPE_UUID128_INCOMPLETE: u8 = 0x06;
const AD_TYPE_UUID128_COMPLETE: u8 = 0x07;
const AD_TYPE_SHORTENED_LOCAL_NAME: u8 = 0x08;
const AD_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;
const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

/// `00000000-0000-1000-8000-00805F9B34FB`, the base for 16/32-bit UUIDs.
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

/// Expand a 16- or 32-bit assigned number into a full UUID.
pub fn uuid_from_short(short: u32) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | (u128::from(short) << 96))
}

/// Fields of an advertisement payload that the aggregation keeps.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AdvertisingData {
    pub flags: Option<u8>,
    /// Complete local name, or the shortened one if that is all there is
    pub name: Option<String>,
    pub service_uuids: BTreeSet<Uuid>,
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
}

/// Parse the AD structures of an advertising payload.
///
/// Unknown AD types are skipped. A zero length byte ends the payload
/// (the remainder is padding).
pub fn parse_advertising_data(data: &[u8]) -> Result<AdvertisingData, DecodeError> {
    let mut parsed = AdvertisingData::default();
    let mut offset = 0;

    while offset < data.len() {
        let len = data[offset] as usize;
        if len == 0 {
            break;
        }
        if offset + 1 + len > data.len() {
            return Err(DecodeError::Truncated(format!(
                "AD structure at offset {offset} declares {len} bytes, {} available",
                data.len() - offset - 1
            )));
        }

        let ad_type = data[offset + 1];
        let value = &data[offset + 2..offset + 1 + len];

        match ad_type {
            AD_TYPE_FLAGS => parsed.flags = value.first().copied(),
            AD_TYPE_SHORTENED_LOCAL_NAME => {
                if parsed.name.is_none() {
                    parsed.name = Some(local_name(value));
                }
            }
            AD_TYPE_COMPLETE_LOCAL_NAME => parsed.name = Some(local_name(value)),
            AD_TYPE_UUID16_INCOMPLETE | AD_TYPE_UUID16_COMPLETE => {
                parsed.service_uuids.extend(
                    value
                        .chunks_exact(2)
                        .map(|c| uuid_from_short(u32::from(u16::from_le_bytes([c[0], c[1]])))),
                );
            }
            AD_TYPE_UUID32_INCOMPLETE | AD_TYPE_UUID32_COMPLETE => {
                parsed.service_uuids.extend(
                    value
                        .chunks_exact(4)
                        .map(|c| uuid_from_short(u32::from_le_bytes([c[0], c[1], c[2], c[3]]))),
                );
            }
            AD_TYPE_UUID128_INCOMPLETE | AD_TYPE_UUID128_COMPLETE => {
                parsed
                    .service_uuids
                    .extend(value.chunks_exact(16).map(uuid_from_le_slice));
            }
            AD_TYPE_MANUFACTURER_DATA => {
                if value.len() < 2 {
                    return Err(DecodeError::InvalidData(
                        "manufacturer data without company identifier".into(),
                    ));
                }
                let company = u16::from_le_bytes([value[0], value[1]]);
                parsed.manufacturer_data.insert(company, value[2..].to_vec());
            }
            _ => {}
        }

        offset += 1 + len;
    }

    Ok(parsed)
}

/// Names are UTF-8, some devices pad them with NULs.
fn local_name(value: &[u8]) -> String {
    String::from_utf8_lossy(value)
        .trim_end_matches('\0')
        .to_string()
}

/// 128-bit UUIDs travel little-endian over the air.
fn uuid_from_le_slice(chunk: &[u8]) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(chunk);
    bytes.reverse();
    Uuid::from_bytes(bytes)
}

/// Monotonic nanosecond clock anchored at the start of a scan.
#[derive(Debug, Clone, Copy)]
pub struct ScanClock {
    epoch: Instant,
}

impl ScanClock {
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    pub fn now_nanos(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
            #[cfg(not(any(feature = "bluer", feature = "hci")))]
            _ => unreachable!("Backend enum has no variants when no backend features are enabled"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            #[cfg(feature = "bluer")]
            "bluer" | "bluez" => Ok(Backend::Bluer),
            #[cfg(feature = "hci")]
            "hci" | "raw" => Ok(Backend::Hci),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Start scanning for advertisements using the specified backend.
///
/// # Arguments
/// * `backend` - The scanner backend to use
/// * `verbose` - If true, decode errors are sent as Err values; otherwise they're silently dropped.
///
/// # Returns
/// A receiver for observations (or decode errors if verbose).
pub async fn start_scan(
    backend: Backend,
    verbose: bool,
) -> Result<mpsc::Receiver<ObservationResult>, ScanError> {
    log::info!("starting {backend} scanner");
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => bluer::start_scan(verbose).await,
        #[cfg(feature = "hci")]
        Backend::Hci => hci::start_scan(verbose).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_uuid_from_short() {
        assert_eq!(
            uuid_from_short(0x180F).to_string(),
            "0000180f-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            uuid_from_short(0xFEEDBEEF).to_string(),
            "feedbeef-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_parse_typical_beacon_payload() {
        let data = [
            0x02, 0x01, 0x06, // flags
            0x05, 0x03, 0x0F, 0x18, 0x0A, 0x18, // complete 16-bit UUIDs 180F, 180A
            0x05, 0xFF, 0x4C, 0x00, 0x02, 0x15, // Apple manufacturer data
        ];
        let parsed = parse_advertising_data(&data).unwrap();

        assert_eq!(parsed.flags, Some(0x06));
        assert_eq!(parsed.service_uuids.len(), 2);
        assert!(parsed.service_uuids.contains(&uuid_from_short(0x180F)));
        assert!(parsed.service_uuids.contains(&uuid_from_short(0x180A)));
        assert_eq!(parsed.manufacturer_data.get(&0x004C), Some(&vec![0x02, 0x15]));
    }

    #[test]
    fn test_parse_128_bit_uuid_and_duplicates() {
        let uuid = Uuid::parse_str("6e400001-b5a3-f393-e0a9-e50e24dcca9e").unwrap();
        let mut le = *uuid.as_bytes();
        le.reverse();

        let mut data = vec![0x11, 0x07];
        data.extend_from_slice(&le);
        data.extend_from_slice(&[0x03, 0x02, 0x0F, 0x18, 0x03, 0x03, 0x0F, 0x18]);

        let parsed = parse_advertising_data(&data).unwrap();
        assert_eq!(parsed.service_uuids.len(), 2);
        assert!(parsed.service_uuids.contains(&uuid));
        assert_eq!(parsed.flags, None);
    }

    #[test]
    fn test_parse_local_names() {
        let data = [
            0x05, 0x08, b'T', b'h', b'e', b'r', // shortened
            0x08, 0x09, b'T', b'h', b'e', b'r', b'm', b'o', 0x00, // complete, NUL padded
        ];
        let parsed = parse_advertising_data(&data).unwrap();
        assert_eq!(parsed.name.as_deref(), Some("Thermo"));

        // a shortened name after the complete one does not replace it
        let data = [0x03, 0x09, b'A', b'B', 0x02, 0x08, b'A'];
        let parsed = parse_advertising_data(&data).unwrap();
        assert_eq!(parsed.name.as_deref(), Some("AB"));

        let parsed = parse_advertising_data(&[0x02, 0x08, 0xFF]).unwrap();
        assert_eq!(parsed.name.as_deref(), Some("\u{FFFD}"));
    }

    #[test]
    fn test_parse_stops_at_padding() {
        let data = [0x02, 0x01, 0x1A, 0x00, 0xFF, 0xFF];
        let parsed = parse_advertising_data(&data).unwrap();
        assert_eq!(parsed.flags, Some(0x1A));
    }

    #[test]
    fn test_parse_rejects_overrun_and_short_manufacturer_data() {
        assert!(matches!(
            parse_advertising_data(&[0x05, 0x01, 0x06]),
            Err(DecodeError::Truncated(_))
        ));
        assert!(matches!(
            parse_advertising_data(&[0x02, 0xFF, 0x4C]),
            Err(DecodeError::InvalidData(_))
        ));
    }

    #[test]
    fn test_scan_clock_is_monotonic() {
        let clock = ScanClock::start();
        let a = clock.now_nanos();
        let b = clock.now_nanos();
        assert!(b >= a);
    }

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::InvalidData("test error".to_string());
        assert_eq!(format!("{}", err), "Invalid data: test error");

        let err = DecodeError::Truncated("report".to_string());
        assert_eq!(format!("{}", err), "Truncated data: report");
    }

    #[test]
    fn test_scan_error_display() {
        let decode_err = DecodeError::InvalidData("test error".to_string());
        let err = ScanError::Decode(decode_err);
        assert_eq!(format!("{}", err), "Decode error: Invalid data: test error");
    }

    #[test]
    #[cfg(all(feature = "bluer", feature = "hci"))]
    fn test_backend_from_str() {
        assert_eq!(Backend::from_str("bluer").unwrap(), Backend::Bluer);
        assert_eq!(Backend::from_str("bluez").unwrap(), Backend::Bluer);
        assert_eq!(Backend::from_str("hci").unwrap(), Backend::Hci);
        assert_eq!(Backend::from_str("raw").unwrap(), Backend::Hci);
        assert!(Backend::from_str("invalid").is_err());
    }

    #[test]
    #[cfg(all(feature = "bluer", feature = "hci"))]
    fn test_backend_display() {
        assert_eq!(format!("{}", Backend::Bluer), "bluer");
        assert_eq!(format!("{}", Backend::Hci), "hci");
    }
}
