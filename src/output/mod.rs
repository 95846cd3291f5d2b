//! Output formatters for device snapshots.
//!
//! This module provides a trait for rendering an [`AggregatedDevice`] and
//! implementations for a human-readable summary and InfluxDB line protocol.

pub mod influxdb;
pub mod text;

use crate::registry::AggregatedDevice;
use std::time::SystemTime;

/// Available output formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// One block of labelled lines per device
    #[default]
    Text,
    /// InfluxDB line protocol, one line per device
    Influxdb,
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::Text => write!(f, "text"),
            Format::Influxdb => write!(f, "influxdb"),
        }
    }
}

/// Trait for formatting devices into output strings.
pub trait OutputFormatter: Send + Sync {
    /// Format a device.
    ///
    /// # Arguments
    /// * `device` - The aggregated device to render
    /// * `rendered_at` - Wall-clock time of the snapshot
    fn format(&self, device: &AggregatedDevice, rendered_at: SystemTime) -> String;
}
