//! InfluxDB line protocol output formatter.

use crate::output::OutputFormatter;
use crate::registry::AggregatedDevice;
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Field values for InfluxDB line protocol
#[derive(Debug, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    String(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Float(num) => write!(f, "{num}"),
            FieldValue::Integer(num) => write!(f, "{num}i"),
            FieldValue::String(s) => {
                write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
            }
        }
    }
}

/// Data point in InfluxDB line protocol
#[derive(Debug)]
pub struct DataPoint {
    pub measurement: String,
    pub tag_set: BTreeMap<String, String>,
    pub field_set: BTreeMap<String, FieldValue>,
    pub timestamp: Option<SystemTime>,
}

fn fmt_tags(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    for (key, value) in data_point.tag_set.iter() {
        write!(fmt, ",{}={}", key, value)?;
    }
    Ok(())
}

fn fmt_fields(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    let mut first = true;
    for (key, value) in data_point.field_set.iter() {
        if first {
            first = false;
        } else {
            write!(fmt, ",")?;
        }
        write!(fmt, "{}={}", key, value)?;
    }
    Ok(())
}

fn fmt_timestamp(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    // Pre-epoch clocks are written without a timestamp; the server assigns one
    if let Some(since_epoch) = data_point
        .timestamp
        .and_then(|time| time.duration_since(SystemTime::UNIX_EPOCH).ok())
    {
        write!(fmt, " {}", since_epoch.as_nanos())?;
    }
    Ok(())
}

impl fmt::Display for DataPoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.measurement)?;
        fmt_tags(self, fmt)?;
        write!(fmt, " ")?;
        fmt_fields(self, fmt)?;
        fmt_timestamp(self, fmt)
    }
}

/// InfluxDB line protocol formatter.
///
/// One line per device, tagged by address, address type and PDU kind.
/// `interval_ms` is omitted while the interval is unknown.
pub struct InfluxDbFormatter {
    /// The measurement name in InfluxDB
    measurement_name: String,
}

impl InfluxDbFormatter {
    pub fn new(measurement_name: String) -> Self {
        Self { measurement_name }
    }

    fn tag_set(&self, device: &AggregatedDevice) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        tags.insert("address".to_string(), device.address.to_string());
        tags.insert(
            "address_type".to_string(),
            device.address_type().as_str().to_string(),
        );
        let pdu = if device.last_legacy { "legacy" } else { "extended" };
        tags.insert("pdu".to_string(), pdu.to_string());
        tags
    }

    fn field_set(&self, device: &AggregatedDevice) -> BTreeMap<String, FieldValue> {
        let mut fields = BTreeMap::new();
        fields.insert(
            "rssi".to_string(),
            FieldValue::Integer(i64::from(device.last_rssi)),
        );
        fields.insert(
            "count".to_string(),
            FieldValue::Integer(i64::try_from(device.observation_count).unwrap_or(i64::MAX)),
        );
        if device.advertising_interval().is_some() {
            fields.insert(
                "interval_ms".to_string(),
                FieldValue::Float(device.estimated_interval_nanos as f64 / 1_000_000.0),
            );
        }
        if let Some(name) = &device.last_name {
            fields.insert("name".to_string(), FieldValue::String(name.clone()));
        }
        if let Some(flags) = device.last_flags {
            fields.insert("flags".to_string(), FieldValue::Integer(i64::from(flags)));
        }
        fields
    }

    fn to_data_point(&self, device: &AggregatedDevice, rendered_at: SystemTime) -> DataPoint {
        DataPoint {
            measurement: self.measurement_name.clone(),
            tag_set: self.tag_set(device),
            field_set: self.field_set(device),
            timestamp: Some(rendered_at),
        }
    }
}

impl OutputFormatter for InfluxDbFormatter {
    fn format(&self, device: &AggregatedDevice, rendered_at: SystemTime) -> String {
        format!("{}", self.to_data_point(device, rendered_at))
    }
}
