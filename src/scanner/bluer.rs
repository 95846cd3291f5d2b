//! BlueZ D-Bus backend.
//!
//! This backend uses the `bluer` crate to run LE discovery through the BlueZ
//! daemon. It requires the `bluetoothd` daemon to be running. BlueZ reports
//! property changes rather than raw advertisements; one advertisement can
//! change several properties at once, but every received advertisement
//! refreshes the RSSI. Each device is therefore watched on its own and only
//! RSSI updates become observations.

use super::{
    DecodeError, OBSERVATION_CHANNEL_BUFFER_SIZE, ObservationResult, ScanClock, ScanError,
};
use crate::mac_address::MacAddress;
use crate::observation::Observation;
use bluer::{
    AdapterEvent, Address, Device, DeviceEvent, DeviceProperty, DiscoveryFilter,
    DiscoveryTransport, Session,
};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Start LE discovery on the default adapter.
///
/// Duplicate advertisements are requested so that repeated packets from the
/// same device keep arriving. Runs until the receiver is dropped.
///
/// # Arguments
/// * `verbose` - If true, read errors are sent as Err values; otherwise they're silently dropped.
pub async fn start_scan(verbose: bool) -> Result<mpsc::Receiver<ObservationResult>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    adapter
        .set_discovery_filter(DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            duplicate_data: true,
            ..Default::default()
        })
        .await?;

    let events = adapter.discover_devices().await?;
    log::info!("discovering on adapter {}", adapter.name());

    let (tx, rx) = mpsc::channel(OBSERVATION_CHANNEL_BUFFER_SIZE);
    let clock = ScanClock::start();

    // Spawn a task that owns all Bluetooth state and runs the event loop
    tokio::spawn(async move {
        let _session = session;
        let mut events = Box::pin(events);
        let mut watchers: HashMap<Address, JoinHandle<()>> = HashMap::new();

        loop {
            tokio::select! {
                event = events.next() => match event {
                    Some(AdapterEvent::DeviceAdded(address)) => {
                        if watchers.contains_key(&address) {
                            log::trace!("{address} already watched");
                        } else {
                            match adapter.device(address) {
                                Ok(device) => {
                                    let watcher = watch_device(device, clock, tx.clone(), verbose);
                                    watchers.insert(address, tokio::spawn(watcher));
                                }
                                Err(e) => log::debug!("opening {address} failed: {e}"),
                            }
                        }
                    }
                    Some(AdapterEvent::DeviceRemoved(address)) => {
                        if let Some(watcher) = watchers.remove(&address) {
                            watcher.abort();
                        }
                    }
                    Some(_) => {}
                    None => break,
                },
                _ = tx.closed() => break,
            }
        }

        for watcher in watchers.into_values() {
            watcher.abort();
        }
    });

    Ok(rx)
}

/// RSSI of every advertisement in a device's property change stream.
///
/// Other property changes, whether carried by the same advertisement or
/// unrelated to advertising (connection state, name resolution), are dropped.
fn advertisements(events: impl Stream<Item = DeviceEvent>) -> impl Stream<Item = i16> {
    events.filter_map(|event| async move {
        match event {
            DeviceEvent::PropertyChanged(DeviceProperty::Rssi(rssi)) => Some(rssi),
            _ => None,
        }
    })
}

/// Send one observation per advertisement received from `device`.
///
/// The advertisement that made BlueZ report the device comes first, if it
/// carried an RSSI. Cached devices reported on discovery start have none.
async fn watch_device(
    device: Device,
    clock: ScanClock,
    tx: mpsc::Sender<ObservationResult>,
    verbose: bool,
) {
    let address = device.address();
    let events = match device.events().await {
        Ok(events) => events,
        Err(e) => {
            log::debug!("watching {address} failed: {e}");
            return;
        }
    };

    let initial = match device.rssi().await {
        Ok(rssi) => rssi,
        Err(e) => {
            log::debug!("reading {address} failed: {e}");
            None
        }
    };
    let mut adverts = Box::pin(futures::stream::iter(initial).chain(advertisements(events)));

    while let Some(rssi) = adverts.next().await {
        let timestamp_nanos = clock.now_nanos();
        let result = match read_observation(&device, rssi, timestamp_nanos).await {
            Ok(observation) => Ok(observation),
            Err(e) => {
                log::debug!("reading {address} failed: {e}");
                if !verbose {
                    continue;
                }
                Err(DecodeError::InvalidData(format!("Bluetooth error: {e}")))
            }
        };

        if tx.send(result).await.is_err() {
            break;
        }
    }
}

/// Read the advertised properties that accompany a fresh RSSI.
async fn read_observation(
    device: &Device,
    rssi: i16,
    timestamp_nanos: u64,
) -> Result<Observation, ScanError> {
    let mut observation = Observation::new(MacAddress::from(device.address()), rssi, timestamp_nanos);
    observation.name = device.name().await?;
    observation.advertising_flags = device.advertising_flags().await?.first().copied();
    if let Some(uuids) = device.uuids().await? {
        observation.service_uuids.extend(uuids);
    }
    if let Some(data) = device.manufacturer_data().await? {
        observation.manufacturer_data.extend(data);
    }

    Ok(observation)
}
