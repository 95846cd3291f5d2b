//! Raw HCI socket backend.
//!
//! Scans for BLE advertisements directly on `hci0` without the BlueZ daemon.
//! Requires CAP_NET_RAW and CAP_NET_ADMIN capabilities or root privileges.

use super::{
    DecodeError, OBSERVATION_CHANNEL_BUFFER_SIZE, ObservationResult, ScanClock, ScanError,
    parse_advertising_data,
};
use crate::mac_address::MacAddress;
use crate::observation::Observation;
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const SOL_HCI: c_int = 0;
const HCI_FILTER: c_int = 2;
const HCI_CHANNEL_RAW: u16 = 0;
const HCI_DEV_ID: u16 = 0;

const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;

const EVT_LE_META_EVENT: u8 = 0x3E;
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

const LE_SCAN_PASSIVE: u8 = 0x00;
const LE_PUBLIC_ADDRESS: u8 = 0x00;
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

/// 10ms in 0.625ms units
const SCAN_INTERVAL_SLOTS: u16 = 0x0010;

/// Event type, address type, address, data length
const REPORT_HEADER_LEN: usize = 1 + 1 + 6 + 1;

/// Max HCI event size
const EVENT_BUFFER_LEN: usize = 258;

#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn new() -> Self {
        Self {
            type_mask: 0,
            event_mask: [0, 0],
            opcode: 0,
        }
    }

    fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << (ptype as u32);
    }

    fn set_event(&mut self, event: u8) {
        let bit = event as usize;
        self.event_mask[bit / 32] |= 1 << (bit % 32);
    }
}

fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

fn le_set_scan_parameters() -> Vec<u8> {
    let mut params = Vec::with_capacity(7);
    params.push(LE_SCAN_PASSIVE);
    params.extend_from_slice(&SCAN_INTERVAL_SLOTS.to_le_bytes());
    params.extend_from_slice(&SCAN_INTERVAL_SLOTS.to_le_bytes()); // window == interval
    params.push(LE_PUBLIC_ADDRESS);
    params.push(FILTER_POLICY_ACCEPT_ALL);
    hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_PARAMETERS, &params)
}

/// Duplicate filtering stays off so every advertisement is reported.
fn le_set_scan_enable(enable: bool) -> Vec<u8> {
    hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &[u8::from(enable), 0x00])
}

fn os_error(context: &str) -> ScanError {
    ScanError::Bluetooth(format!("{context}: {}", io::Error::last_os_error()))
}

/// Open a non-blocking raw HCI socket bound to `dev_id`.
fn open_bound_socket(dev_id: u16) -> Result<OwnedFd, ScanError> {
    let fd = unsafe {
        libc::socket(
            AF_BLUETOOTH,
            SOCK_RAW | SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            BTPROTO_HCI,
        )
    };
    if fd < 0 {
        return Err(os_error("Failed to create HCI socket"));
    }
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: dev_id,
        hci_channel: HCI_CHANNEL_RAW,
    };
    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };
    if ret < 0 {
        return Err(os_error("Failed to bind HCI socket"));
    }

    Ok(fd)
}

fn set_le_meta_filter(fd: &OwnedFd) -> Result<(), ScanError> {
    let mut filter = HciFilter::new();
    filter.set_ptype(HCI_EVENT_PKT);
    filter.set_event(EVT_LE_META_EVENT);

    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            SOL_HCI,
            HCI_FILTER,
            &filter as *const HciFilter as *const c_void,
            mem::size_of::<HciFilter>() as socklen_t,
        )
    };
    if ret < 0 {
        return Err(os_error("Failed to set HCI filter"));
    }
    Ok(())
}

fn send_hci_command(fd: &OwnedFd, packet: &[u8]) -> Result<(), ScanError> {
    let ret = unsafe {
        libc::write(
            fd.as_raw_fd(),
            packet.as_ptr() as *const c_void,
            packet.len(),
        )
    };
    if ret < 0 {
        return Err(os_error("Failed to send HCI command"));
    }
    Ok(())
}

/// Command socket that turns LE scanning off again when dropped.
struct ScanGuard(OwnedFd);

impl ScanGuard {
    fn enable(fd: OwnedFd) -> Result<Self, ScanError> {
        send_hci_command(&fd, &le_set_scan_parameters())?;
        send_hci_command(&fd, &le_set_scan_enable(true))?;
        Ok(Self(fd))
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        if let Err(e) = send_hci_command(&self.0, &le_set_scan_enable(false)) {
            log::warn!("could not disable LE scan: {e}");
        }
    }
}

/// Parse every report in an LE Advertising Report event.
///
/// `packet` starts at the HCI packet type byte. Reports are laid out one
/// after another; a truncated report ends parsing with an error entry.
fn parse_advertising_report(packet: &[u8], timestamp_nanos: u64) -> Vec<ObservationResult> {
    // packet type, event code, parameter length, subevent
    let Some(params) = packet.get(4..) else {
        return vec![Err(DecodeError::Truncated("LE meta event header".into()))];
    };
    let Some((&num_reports, mut rest)) = params.split_first() else {
        return vec![Err(DecodeError::Truncated("missing report count".into()))];
    };

    let mut results = Vec::with_capacity(num_reports as usize);
    for index in 0..num_reports {
        if rest.len() < REPORT_HEADER_LEN {
            results.push(Err(DecodeError::Truncated(format!(
                "advertising report {index} header"
            ))));
            break;
        }

        let mut addr = [0u8; 6];
        addr.copy_from_slice(&rest[2..8]);
        addr.reverse(); // HCI uses little-endian address

        let data_len = rest[8] as usize;
        // AD payload followed by one RSSI byte
        let Some(ad_data) = rest.get(REPORT_HEADER_LEN..REPORT_HEADER_LEN + data_len) else {
            results.push(Err(DecodeError::Truncated(format!(
                "advertising report {index} data"
            ))));
            break;
        };
        let Some(&rssi) = rest.get(REPORT_HEADER_LEN + data_len) else {
            results.push(Err(DecodeError::Truncated(format!(
                "advertising report {index} RSSI"
            ))));
            break;
        };

        results.push(parse_advertising_data(ad_data).map(|ad| Observation {
            address: MacAddress(addr),
            rssi: i16::from(rssi as i8),
            timestamp_nanos,
            advertising_flags: ad.flags,
            is_legacy: true,
            name: ad.name,
            service_uuids: ad.service_uuids,
            manufacturer_data: ad.manufacturer_data,
        }));

        rest = &rest[REPORT_HEADER_LEN + data_len + 1..];
    }

    results
}

/// Start a passive LE scan on `hci0`.
///
/// Observations are sent through the returned channel until the receiver is
/// dropped, at which point scanning is disabled.
///
/// # Arguments
/// * `verbose` - If true, decode errors are sent as Err values; otherwise they're silently dropped.
///
/// # Requirements
/// - CAP_NET_RAW and CAP_NET_ADMIN capabilities or root privileges
/// - An available HCI device (typically hci0)
pub async fn start_scan(verbose: bool) -> Result<mpsc::Receiver<ObservationResult>, ScanError> {
    let fd = open_bound_socket(HCI_DEV_ID)?;
    set_le_meta_filter(&fd)?;

    // Commands go through a separate socket bound to the same device
    let guard = ScanGuard::enable(open_bound_socket(HCI_DEV_ID)?)?;

    let (tx, rx) = mpsc::channel(OBSERVATION_CHANNEL_BUFFER_SIZE);
    let clock = ScanClock::start();

    let async_fd = AsyncFd::new(fd)
        .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {}", e)))?;

    tokio::spawn(async move {
        let _guard = guard;
        let mut buf = [0u8; EVENT_BUFFER_LEN];

        'events: loop {
            let mut ready = tokio::select! {
                ready = async_fd.readable() => match ready {
                    Ok(ready) => ready,
                    Err(e) => {
                        log::warn!("HCI socket error: {e}");
                        break;
                    }
                },
                _ = tx.closed() => break,
            };

            // Drain all available packets before waiting again
            loop {
                let n = match ready.try_io(|inner| {
                    let ret = unsafe {
                        libc::read(
                            inner.as_raw_fd(),
                            buf.as_mut_ptr() as *mut c_void,
                            buf.len(),
                        )
                    };
                    if ret < 0 {
                        Err(io::Error::last_os_error())
                    } else {
                        Ok(ret as usize)
                    }
                }) {
                    Ok(Ok(n)) if n > 0 => n,
                    Ok(Ok(_)) => break 'events, // EOF
                    Ok(Err(e)) => {
                        log::warn!("HCI read failed: {e}");
                        break 'events;
                    }
                    Err(_would_block) => break,
                };

                let is_report = n >= 4
                    && buf[0] == HCI_EVENT_PKT
                    && buf[1] == EVT_LE_META_EVENT
                    && buf[3] == EVT_LE_ADVERTISING_REPORT;
                if !is_report {
                    continue;
                }

                for result in parse_advertising_report(&buf[..n], clock.now_nanos()) {
                    if result.is_err() && !verbose {
                        continue;
                    }
                    if tx.send(result).await.is_err() {
                        break 'events;
                    }
                }
            }
        }
    });

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::uuid_from_short;

    fn report(addr_le: [u8; 6], ad: &[u8], rssi: i8) -> Vec<u8> {
        let mut r = vec![0x00, 0x01]; // ADV_IND, random address
        r.extend_from_slice(&addr_le);
        r.push(ad.len() as u8);
        r.extend_from_slice(ad);
        r.push(rssi as u8);
        r
    }

    fn event(reports: &[Vec<u8>]) -> Vec<u8> {
        let body: Vec<u8> = reports.concat();
        let mut packet = vec![
            HCI_EVENT_PKT,
            EVT_LE_META_EVENT,
            (2 + body.len()) as u8,
            EVT_LE_ADVERTISING_REPORT,
            reports.len() as u8,
        ];
        packet.extend_from_slice(&body);
        packet
    }

    #[test]
    fn test_hci_filter_setup() {
        let mut filter = HciFilter::new();
        filter.set_ptype(HCI_EVENT_PKT);
        filter.set_event(EVT_LE_META_EVENT);

        assert_eq!(filter.type_mask, 1 << HCI_EVENT_PKT);
        // 0x3E = 62 lands in the second word
        assert_eq!(filter.event_mask[1], 1 << (EVT_LE_META_EVENT % 32));
        assert_eq!(filter.event_mask[0], 0);
    }

    #[test]
    fn test_scan_commands() {
        let enable = le_set_scan_enable(true);
        assert_eq!(enable, vec![0x01, 0x0C, 0x20, 0x02, 0x01, 0x00]);

        let disable = le_set_scan_enable(false);
        assert_eq!(disable[4], 0x00);

        let params = le_set_scan_parameters();
        assert_eq!(&params[..4], &[0x01, 0x0B, 0x20, 0x07]);
        assert_eq!(&params[4..], &[0x00, 0x10, 0x00, 0x10, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_parse_single_report() {
        let ad = [0x02, 0x01, 0x06, 0x03, 0x03, 0x0F, 0x18];
        let packet = event(&[report([0x66, 0x55, 0x44, 0x33, 0x22, 0xC1], &ad, -70)]);

        let results = parse_advertising_report(&packet, 42);
        assert_eq!(results.len(), 1);
        let observation = results[0].as_ref().unwrap();
        assert_eq!(observation.address.to_string(), "C1:22:33:44:55:66");
        assert_eq!(observation.rssi, -70);
        assert_eq!(observation.timestamp_nanos, 42);
        assert_eq!(observation.advertising_flags, Some(0x06));
        assert!(observation.is_legacy);
        assert!(observation.service_uuids.contains(&uuid_from_short(0x180F)));
    }

    #[test]
    fn test_parse_multiple_reports() {
        let packet = event(&[
            report([1, 0, 0, 0, 0, 0xAA], &[], -40),
            report([2, 0, 0, 0, 0, 0xBB], &[0x04, 0xFF, 0x4C, 0x00, 0x10], -90),
        ]);

        let results = parse_advertising_report(&packet, 7);
        assert_eq!(results.len(), 2);
        let second = results[1].as_ref().unwrap();
        assert_eq!(second.address, MacAddress([0xBB, 0, 0, 0, 0, 2]));
        assert_eq!(second.rssi, -90);
        assert_eq!(second.manufacturer_data.get(&0x004C), Some(&vec![0x10]));
    }

    #[test]
    fn test_parse_truncated_report() {
        let mut packet = event(&[report([1, 2, 3, 4, 5, 6], &[0x02, 0x01, 0x06], -50)]);
        packet.truncate(packet.len() - 1); // drop RSSI

        let results = parse_advertising_report(&packet, 0);
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(DecodeError::Truncated(_))));

        assert!(matches!(
            parse_advertising_report(&[HCI_EVENT_PKT, EVT_LE_META_EVENT], 0)[0],
            Err(DecodeError::Truncated(_))
        ));
    }

    #[test]
    fn test_parse_bad_ad_payload_keeps_later_reports() {
        let packet = event(&[
            report([1, 0, 0, 0, 0, 0], &[0x09, 0x01], -50),
            report([2, 0, 0, 0, 0, 0], &[], -50),
        ]);
        let results = parse_advertising_report(&packet, 0);
        assert_eq!(results.len(), 2);
        assert!(results[0].is_err());
        assert!(results[1].is_ok());
    }
}
