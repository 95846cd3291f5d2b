//! `beacon-scan` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup and
//! process exit codes. The core “business logic” lives in [`crate::app`] where
//! it can be tested deterministically with injected scanner + injected output streams.
//!
//! Observations flow from a [`scanner`] backend into a [`session::ScanSession`],
//! which folds them into a [`registry::DeviceRegistry`] while the session is
//! scanning. Each device carries an advertising interval estimate from [`interval`].

pub mod address_type;
pub mod app;
pub mod duration;
pub mod flags;
pub mod interval;
pub mod mac_address;
pub mod observation;
pub mod output;
pub mod registry;
pub mod scanner;
pub mod session;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use address_type::{AddressType, classify};
pub use duration::parse_duration;
pub use interval::estimate_interval_nanos;
pub use mac_address::{InvalidAddressFormat, MacAddress};
pub use observation::Observation;
pub use output::OutputFormatter;
pub use output::influxdb::InfluxDbFormatter;
pub use output::text::TextFormatter;
pub use registry::{AggregatedDevice, DeviceRegistry};
pub use scanner::{Backend, DecodeError, ObservationResult, ScanError};
pub use session::{ScanSession, ScanState, SessionError};
