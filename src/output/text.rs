//! Human-readable device summary.

use crate::flags::{describe_flags, pdu_label};
use crate::output::OutputFormatter;
use crate::registry::AggregatedDevice;
use std::fmt::Write;
use std::time::SystemTime;

/// Shown when a device never advertised a name.
const UNKNOWN_DEVICE: &str = "Unknown device";

/// Renders each device as a block of labelled lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextFormatter;

impl OutputFormatter for TextFormatter {
    fn format(&self, device: &AggregatedDevice, _rendered_at: SystemTime) -> String {
        let mut out = String::new();

        // Writing to a String cannot fail
        let _ = writeln!(out, "{} ({})", device.address, device.address_type());
        let _ = writeln!(
            out,
            "  Name: {}",
            device.last_name.as_deref().unwrap_or(UNKNOWN_DEVICE)
        );
        let _ = writeln!(out, "  Advertising Type: {}", pdu_label(device.last_legacy));
        let _ = writeln!(
            out,
            "  Advertising Flags: {}",
            describe_flags(device.last_flags)
        );
        let _ = writeln!(out, "  RSSI: {}", device.last_rssi);
        let _ = write!(out, "  Packets: {}", device.observation_count);

        if let Some(interval) = device.advertising_interval() {
            let _ = write!(out, "\n  Advertising Interval: {} ms", interval.as_millis());
        }
        for uuid in &device.last_uuids {
            let _ = write!(out, "\n  Service: {uuid}");
        }
        for (company, payload) in &device.last_manufacturer_data {
            let _ = write!(
                out,
                "\n  Manufacturer 0x{company:04X}: {} ({} bytes)",
                hex::encode_upper(payload),
                payload.len()
            );
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DeviceRegistry;
    use crate::scanner::uuid_from_short;
    use crate::test_utils::{TEST_MAC, observation_at};

    #[test]
    fn test_single_observation_has_no_interval() {
        let mut registry = DeviceRegistry::new();
        let device = registry.merge(observation_at(TEST_MAC, 0));

        let text = TextFormatter.format(device, SystemTime::UNIX_EPOCH);
        assert_eq!(
            text,
            "AA:BB:CC:DD:EE:FF (Public Address)\n  Name: Unknown device\n  Advertising Type: Legacy\n  Advertising Flags: None\n  RSSI: -60\n  Packets: 1"
        );
    }

    #[test]
    fn test_full_device() {
        let mut registry = DeviceRegistry::new();
        registry.merge(observation_at(TEST_MAC, 0));
        let mut last = observation_at(TEST_MAC, 100);
        last.advertising_flags = Some(0x06);
        last.is_legacy = false;
        last.name = Some("Thermo".to_string());
        last.service_uuids.insert(uuid_from_short(0x180F));
        last.manufacturer_data.insert(0x004C, vec![0x02, 0x15, 0xAB]);
        let device = registry.merge(last);

        let text = TextFormatter.format(device, SystemTime::UNIX_EPOCH);
        assert!(text.contains("\n  Name: Thermo\n"));
        assert!(text.contains("Advertising Type: Extended"));
        assert!(text.contains(
            "Advertising Flags: BR/EDR Not Supported, LE General Discoverable Mode"
        ));
        assert!(text.contains("Packets: 2"));
        assert!(text.contains("Advertising Interval: 100 ms"));
        assert!(text.contains("Service: 0000180f-0000-1000-8000-00805f9b34fb"));
        assert!(text.contains("Manufacturer 0x004C: 0215AB (3 bytes)"));
        assert!(!text.ends_with('\n'));
    }
}
