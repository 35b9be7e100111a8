//! Core types for the Synheart Sync engine
//!
//! This module defines the data structures that flow through each stage of the
//! engine: raw records, normalized samples, gaps, and aligned frames.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;

/// Sensor stream identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    HeartRate,
    Movement,
    BloodOxygen,
    SkinTemperature,
    Load,
}

impl StreamKind {
    /// Every stream the engine knows how to ingest
    pub const ALL: [StreamKind; 5] = [
        StreamKind::HeartRate,
        StreamKind::Movement,
        StreamKind::BloodOxygen,
        StreamKind::SkinTemperature,
        StreamKind::Load,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::HeartRate => "heart_rate",
            StreamKind::Movement => "movement",
            StreamKind::BloodOxygen => "blood_oxygen",
            StreamKind::SkinTemperature => "skin_temperature",
            StreamKind::Load => "load",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StreamKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim())
            .ok_or_else(|| SyncError::UnknownStream(s.to_string()))
    }
}

/// A UTC point in time at millisecond resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Instant(i64);

impl Instant {
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub const fn as_millis(self) -> i64 {
        self.0
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.0)
    }

    /// Shift by a signed number of milliseconds, saturating at the i64 bounds
    pub fn offset_by(self, millis: i64) -> Self {
        Self(self.0.saturating_add(millis))
    }

    /// Milliseconds elapsed since `earlier` (negative when `earlier` is later)
    pub fn millis_since(self, earlier: Instant) -> i64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => f.write_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => write!(f, "{}ms", self.0),
        }
    }
}

/// Timestamp value exactly as it appeared in the source record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for RawTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawTimestamp::Integer(v) => write!(f, "{v}"),
            RawTimestamp::Float(v) => write!(f, "{v}"),
            RawTimestamp::Text(v) => f.write_str(v),
        }
    }
}

/// A single payload value after adaptation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Flag(bool),
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

/// Payload fields keyed by their source field name
pub type Payload = BTreeMap<String, FieldValue>;

/// One record as read from a stream file, before any interpretation.
///
/// The timestamp stays inside `fields` under the stream's declared timestamp
/// field; the adapter for the stream knows which one it is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub stream: StreamKind,
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl RawRecord {
    pub fn new(stream: StreamKind, fields: serde_json::Map<String, serde_json::Value>) -> Self {
        Self { stream, fields }
    }

    /// Build a record from any JSON value; non-object values yield an empty record
    pub fn from_value(stream: StreamKind, value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(fields) => Self { stream, fields },
            _ => Self {
                stream,
                fields: serde_json::Map::new(),
            },
        }
    }

    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name)
    }

    /// Extract the raw timestamp stored under `field`, if present and non-null
    pub fn raw_timestamp(&self, field: &str) -> Option<RawTimestamp> {
        match self.fields.get(field)? {
            serde_json::Value::Null => None,
            serde_json::Value::Number(n) => Some(match n.as_i64() {
                Some(v) => RawTimestamp::Integer(v),
                None => RawTimestamp::Float(n.as_f64().unwrap_or(f64::NAN)),
            }),
            serde_json::Value::String(s) => Some(RawTimestamp::Text(s.clone())),
            other => Some(RawTimestamp::Text(other.to_string())),
        }
    }
}

/// Quality classification of a sample
///
/// Declaration order is ascending priority; when several rules fire the
/// highest-priority one wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Valid,
    LowConfidence,
    OutOfRange,
    SensorError,
}

impl Quality {
    pub fn is_valid(&self) -> bool {
        matches!(self, Quality::Valid)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Valid => "valid",
            Quality::LowConfidence => "low_confidence",
            Quality::OutOfRange => "out_of_range",
            Quality::SensorError => "sensor_error",
        }
    }
}

/// A parsed, timestamp-normalized and classified sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSample {
    pub stream: StreamKind,
    pub instant: Instant,
    pub fields: Payload,
    pub quality: Quality,
}

impl NormalizedSample {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn value_f64(&self, name: &str) -> Option<f64> {
        self.field(name).and_then(FieldValue::as_f64)
    }
}

/// How a field behaves when resampled onto the canonical axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Numeric measurement that can be interpolated
    Continuous,
    /// Label or flag; only ever carried forward
    Categorical,
}

/// How several coincident samples collapse into one cell value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Mean,
    MostRecent,
}

/// Declared payload field of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub aggregation: Aggregation,
}

impl FieldSpec {
    pub const fn continuous(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Continuous,
            aggregation: Aggregation::Mean,
        }
    }

    pub const fn categorical(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Categorical,
            aggregation: Aggregation::MostRecent,
        }
    }
}

/// Physiologically plausible bounds for one field (inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValueRange {
    pub field: &'static str,
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Static description of a stream, captured from its adapter at ingest
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamProfile {
    pub kind: StreamKind,
    pub expected_interval_ms: i64,
    pub fields: &'static [FieldSpec],
    pub value_range: Option<ValueRange>,
}

/// An interval where a stream stopped reporting for longer than expected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    pub stream: StreamKind,
    pub start: Instant,
    pub end: Instant,
    pub duration_ms: i64,
}

/// Where an aligned value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Real,
    Interpolated,
    ForwardFilled,
    Missing,
}

/// One resolved field inside a cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCell {
    pub value: FieldValue,
    pub provenance: Provenance,
}

/// Value of one stream at one axis instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub provenance: Provenance,
    /// Quality of the backing sample(s); only set on `real` cells
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub quality: Option<Quality>,
    /// Instant of the sample a `real` cell was taken from
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source: Option<Instant>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub fields: BTreeMap<String, FieldCell>,
}

impl Cell {
    pub fn missing() -> Self {
        Self {
            provenance: Provenance::Missing,
            quality: None,
            source: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn is_missing(&self) -> bool {
        self.provenance == Provenance::Missing
    }

    pub fn value(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field).map(|cell| &cell.value)
    }

    pub fn value_f64(&self, field: &str) -> Option<f64> {
        self.value(field).and_then(FieldValue::as_f64)
    }
}

/// All streams resolved at one canonical instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedFrame {
    pub instant: Instant,
    pub cells: BTreeMap<StreamKind, Cell>,
}

impl AlignedFrame {
    pub fn cell(&self, stream: StreamKind) -> Option<&Cell> {
        self.cells.get(&stream)
    }

}
