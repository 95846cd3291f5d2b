//! Core application runner (business logic) for `beacon-scan`.
//!
//! This module is intentionally decoupled from CLI parsing and process exit codes
//! so it can be tested deterministically.

use crate::output::influxdb::InfluxDbFormatter;
use crate::output::text::TextFormatter;
use crate::output::{Format, OutputFormatter};
use crate::registry::AggregatedDevice;
use crate::scanner::{Backend, ObservationResult, ScanError};
use crate::session::{ScanSession, ScanState, SessionError};
use clap::Parser;
use std::future::Future;
use std::io;
use std::io::Write;
use std::pin::Pin;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval};

/// Configuration for the core run loop.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// How long to scan before printing the device summary.
    /// Accepts duration with suffix: 20s, 1m, 500ms, 2h.
    /// Without suffix, value is interpreted as seconds.
    #[arg(long, default_value = "20s", value_parser = crate::duration::parse_duration)]
    pub timeout: Duration,

    /// Also print the summary at this period while scanning
    #[arg(long, value_parser = crate::duration::parse_duration)]
    pub refresh: Option<Duration>,

    /// Output format of the summary
    #[arg(long, default_value_t, value_enum)]
    pub format: Format,

    /// The name of the measurement in InfluxDB line protocol.
    #[arg(long, default_value = "ble_device")]
    pub influxdb_measurement: String,

    /// Verbose output, print errors for malformed advertisements
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Scanner abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    fn start_scan(
        &self,
        backend: Backend,
        verbose: bool,
    ) -> Pin<
        Box<dyn Future<Output = Result<mpsc::Receiver<ObservationResult>, ScanError>> + Send + '_>,
    >;
}

/// Real scanner implementation that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(
        &self,
        backend: Backend,
        verbose: bool,
    ) -> Pin<
        Box<dyn Future<Output = Result<mpsc::Receiver<ObservationResult>, ScanError>> + Send + '_>,
    > {
        Box::pin(async move { crate::scanner::start_scan(backend, verbose).await })
    }
}

fn formatter_for(options: &Options) -> Box<dyn OutputFormatter> {
    match options.format {
        Format::Text => Box::new(TextFormatter),
        Format::Influxdb => Box::new(InfluxDbFormatter::new(
            options.influxdb_measurement.clone(),
        )),
    }
}

fn write_snapshot(
    formatter: &dyn OutputFormatter,
    devices: &[AggregatedDevice],
    out: &mut dyn Write,
) -> io::Result<()> {
    let rendered_at = SystemTime::now();
    for device in devices {
        writeln!(out, "{}", formatter.format(device, rendered_at))?;
    }
    out.flush()
}

async fn next_refresh(refresh: &mut Option<Interval>) {
    match refresh {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Run one scan session, writing the device summary to `out` and verbose errors to `err`.
///
/// - Every observation is merged while the session is scanning.
/// - The session ends when `options.timeout` elapses or the scanner stops producing.
/// - On malformed advertisements, it writes the error to `err` only when `options.verbose` is true.
pub async fn run_with_io(
    options: Options,
    scanner: &dyn Scanner,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<(), RunError> {
    let formatter = formatter_for(&options);
    let session = ScanSession::new();

    let mut observations = scanner.start_scan(options.backend, options.verbose).await?;
    session.start(options.timeout)?;

    let mut state = session.subscribe();
    let mut refresh = options
        .refresh
        .filter(|period| !period.is_zero())
        .map(|period| time::interval_at(Instant::now() + period, period));

    loop {
        tokio::select! {
            received = observations.recv() => match received {
                Some(Ok(observation)) => {
                    session.submit(observation);
                }
                Some(Err(decode_err)) => {
                    if options.verbose {
                        writeln!(err, "{decode_err}")?;
                    }
                }
                None => {
                    log::info!("scanner stopped producing observations");
                    break;
                }
            },
            _ = state.wait_for(|s| *s == ScanState::Idle) => break,
            _ = next_refresh(&mut refresh) => {
                write_snapshot(formatter.as_ref(), &session.snapshot(), out)?;
            }
        }
    }

    session.stop();
    write_snapshot(formatter.as_ref(), &session.snapshot(), out)?;
    Ok(())
}
