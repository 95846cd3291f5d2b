//! Integration benchmark for the scan summary pipeline.
//!
//! Benchmarks the full application loop using the same patterns as the
//! integration tests in app.rs - with a FakeScanner feeding observations
//! through run_with_io.

use beacon_scan::app::{Options, Scanner, run_with_io};
use beacon_scan::output::Format;
use beacon_scan::{Backend, MacAddress, Observation, ObservationResult, ScanError};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use uuid::Uuid;

const MS: u64 = 1_000_000;

/// An iBeacon-like observation from one of `devices` addresses.
fn observation(index: u64, devices: u64) -> Observation {
    let device = (index % devices) as u8;
    let mut observation = Observation::new(
        MacAddress([0xC0, 0x00, 0x00, 0x00, 0x00, device]),
        -60 - (index % 20) as i16,
        index / devices * 100 * MS,
    );
    observation.advertising_flags = Some(0x06);
    observation
        .service_uuids
        .insert(Uuid::from_u128(0x0000180F_0000_1000_8000_00805F9B34FB));
    observation
        .manufacturer_data
        .insert(0x004C, vec![0x02, 0x15, 0xE2, 0xC5, 0x6D, 0xB5]);
    observation
}

/// A fake scanner that yields prepared observations, similar to the one in app.rs tests.
struct FakeScanner {
    results: Vec<ObservationResult>,
}

impl FakeScanner {
    fn new(count: u64, devices: u64) -> Self {
        Self {
            results: (0..count).map(|i| Ok(observation(i, devices))).collect(),
        }
    }
}

impl Scanner for FakeScanner {
    fn start_scan(
        &self,
        _backend: Backend,
        _verbose: bool,
    ) -> Pin<
        Box<dyn Future<Output = Result<mpsc::Receiver<ObservationResult>, ScanError>> + Send + '_>,
    > {
        let results = self.results.clone();
        Box::pin(async move {
            let (tx, rx) = mpsc::channel::<ObservationResult>(results.len().max(1));
            tokio::spawn(async move {
                for r in results {
                    let _ = tx.send(r).await;
                }
            });
            Ok(rx)
        })
    }
}

fn default_options(format: Format) -> Options {
    Options {
        timeout: Duration::from_secs(20),
        refresh: None,
        format,
        influxdb_measurement: "ble_device".to_string(),
        verbose: false,
        backend: Backend::Bluer,
    }
}

/// Benchmark the full application pipeline: scanner -> session -> registry -> format -> write
fn bench_app_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("app_pipeline");
    let rt = Runtime::new().unwrap();

    for format in [Format::Text, Format::Influxdb] {
        group.throughput(Throughput::Elements(100));
        group.bench_with_input(
            BenchmarkId::new("100_from_10_devices", format),
            &format,
            |b, &format| {
                b.iter(|| {
                    let scanner = FakeScanner::new(100, 10);
                    let mut out = Vec::<u8>::with_capacity(4096);
                    let mut err = Vec::<u8>::new();

                    rt.block_on(async {
                        run_with_io(default_options(format), &scanner, &mut out, &mut err)
                            .await
                            .unwrap();
                    });

                    black_box(out)
                })
            },
        );
    }

    group.finish();
}

/// Benchmark growing histories, where every merge re-estimates the interval
fn bench_single_device_history(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_device_history");
    let rt = Runtime::new().unwrap();

    for count in [10, 100, 1000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let scanner = FakeScanner::new(count, 1);
                let mut out = Vec::<u8>::with_capacity(512);
                let mut err = Vec::<u8>::new();

                rt.block_on(async {
                    run_with_io(default_options(Format::Text), &scanner, &mut out, &mut err)
                        .await
                        .unwrap();
                });

                black_box(out)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_app_pipeline, bench_single_device_history);
criterion_main!(benches);
