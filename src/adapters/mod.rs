//! Stream format adapters
//!
//! This module provides one adapter per sensor stream. An adapter knows its
//! stream's timestamp encoding, payload fields, sampling cadence, and quality
//! rules, and turns raw records into normalized samples.
//!
//! Adding a stream means adding a `StreamKind` variant and registering one
//! adapter; the gap detector and aligner only see `StreamProfile`s.

mod blood_oxygen;
mod heart_rate;
mod load;
mod movement;
mod skin_temperature;

pub use blood_oxygen::BloodOxygenAdapter;
pub use heart_rate::HeartRateAdapter;
pub use load::LoadAdapter;
pub use movement::MovementAdapter;
pub use skin_temperature::SkinTemperatureAdapter;

use std::collections::BTreeMap;

use crate::error::{FieldProblem, FormatError, RecordError, ValidationError};
use crate::normalizer::{TimestampFormat, TimestampNormalizer};
use crate::quality::{QualityClassifier, QualityRules};
use crate::types::{
    FieldSpec, FieldValue, NormalizedSample, Payload, RawRecord, StreamKind, StreamProfile,
    ValueRange,
};

/// A payload field that failed extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadError {
    pub field: &'static str,
    pub problem: FieldProblem,
}

/// Trait for per-stream format adapters
pub trait StreamAdapter: Send + Sync {
    fn kind(&self) -> StreamKind;

    /// Name of the record field holding the timestamp
    fn timestamp_field(&self) -> &'static str;

    fn timestamp_format(&self) -> TimestampFormat;

    /// Nominal spacing between consecutive samples
    fn expected_interval_ms(&self) -> i64;

    fn fields(&self) -> &'static [FieldSpec];

    fn quality_rules(&self) -> &'static QualityRules;

    /// Pull and type-check the payload fields out of a raw record
    fn extract_payload(&self, record: &RawRecord) -> Result<Payload, PayloadError>;

    fn value_range(&self) -> Option<ValueRange> {
        self.quality_rules().range
    }

    fn profile(&self) -> StreamProfile {
        StreamProfile {
            kind: self.kind(),
            expected_interval_ms: self.expected_interval_ms(),
            fields: self.fields(),
            value_range: self.value_range(),
        }
    }

    /// Parse one raw record; `index` is its position in the source
    fn parse(&self, index: usize, record: &RawRecord) -> Result<NormalizedSample, RecordError> {
        let stream = self.kind();
        let timestamp_field = self.timestamp_field();

        let raw = record.raw_timestamp(timestamp_field).ok_or_else(|| ValidationError {
            stream,
            index,
            field: timestamp_field.to_string(),
            problem: FieldProblem::Missing,
        })?;

        let instant =
            TimestampNormalizer::normalize(&raw, self.timestamp_format()).map_err(|reason| FormatError {
                stream,
                index,
                raw: raw.to_string(),
                reason,
            })?;

        let fields = self.extract_payload(record).map_err(|e| ValidationError {
            stream,
            index,
            field: e.field.to_string(),
            problem: e.problem,
        })?;

        let quality = QualityClassifier::classify(&fields, self.quality_rules());

        Ok(NormalizedSample {
            stream,
            instant,
            fields,
            quality,
        })
    }
}

/// Registry of adapters keyed by stream
pub struct AdapterRegistry {
    adapters: BTreeMap<StreamKind, Box<dyn StreamAdapter>>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl AdapterRegistry {
    /// Create an empty registry
    pub fn empty() -> Self {
        Self {
            adapters: BTreeMap::new(),
        }
    }

    /// Registry with the five built-in streams
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(HeartRateAdapter));
        registry.register(Box::new(MovementAdapter));
        registry.register(Box::new(BloodOxygenAdapter));
        registry.register(Box::new(SkinTemperatureAdapter));
        registry.register(Box::new(LoadAdapter));
        registry
    }

    /// Register an adapter, returning the one it replaced
    pub fn register(&mut self, adapter: Box<dyn StreamAdapter>) -> Option<Box<dyn StreamAdapter>> {
        self.adapters.insert(adapter.kind(), adapter)
    }

    pub fn get(&self, kind: StreamKind) -> Option<&dyn StreamAdapter> {
        self.adapters.get(&kind).map(|adapter| adapter.as_ref())
    }

    pub fn kinds(&self) -> impl Iterator<Item = StreamKind> + '_ {
        self.adapters.keys().copied()
    }
}

/// Built-in adapter for a stream
pub fn standard_adapter(kind: StreamKind) -> &'static dyn StreamAdapter {
    static HEART_RATE: HeartRateAdapter = HeartRateAdapter;
    static MOVEMENT: MovementAdapter = MovementAdapter;
    static BLOOD_OXYGEN: BloodOxygenAdapter = BloodOxygenAdapter;
    static SKIN_TEMPERATURE: SkinTemperatureAdapter = SkinTemperatureAdapter;
    static LOAD: LoadAdapter = LoadAdapter;

    match kind {
        StreamKind::HeartRate => &HEART_RATE,
        StreamKind::Movement => &MOVEMENT,
        StreamKind::BloodOxygen => &BLOOD_OXYGEN,
        StreamKind::SkinTemperature => &SKIN_TEMPERATURE,
        StreamKind::Load => &LOAD,
    }
}

// Payload extraction helpers shared by the adapters

fn number_from(value: &serde_json::Value) -> Option<FieldValue> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().map(FieldValue::Number),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(FieldValue::Number),
        _ => None,
    }
}

/// Field must be present and numeric
pub(crate) fn require_number(record: &RawRecord, field: &'static str) -> Result<FieldValue, PayloadError> {
    match record.field(field) {
        None => Err(missing(field)),
        Some(value) => number_from(value).ok_or(wrong_type(field, "a number")),
    }
}

/// Field must be present; null is kept as `FieldValue::Null`
pub(crate) fn nullable_number(record: &RawRecord, field: &'static str) -> Result<FieldValue, PayloadError> {
    match record.field(field) {
        None => Err(missing(field)),
        Some(serde_json::Value::Null) => Ok(FieldValue::Null),
        Some(value) => number_from(value).ok_or(wrong_type(field, "a number or null")),
    }
}

/// Field may be absent or null
pub(crate) fn optional_number(record: &RawRecord, field: &'static str) -> Result<FieldValue, PayloadError> {
    match record.field(field) {
        None | Some(serde_json::Value::Null) => Ok(FieldValue::Null),
        Some(value) => number_from(value).ok_or(wrong_type(field, "a number")),
    }
}

pub(crate) fn require_text(record: &RawRecord, field: &'static str) -> Result<FieldValue, PayloadError> {
    match record.field(field) {
        None => Err(missing(field)),
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Ok(FieldValue::Text(s.trim().to_string())),
        Some(_) => Err(wrong_type(field, "non-empty text")),
    }
}

/// Accepts JSON booleans and `true`/`false` text in any case
pub(crate) fn require_flag(record: &RawRecord, field: &'static str) -> Result<FieldValue, PayloadError> {
    match record.field(field) {
        None => Err(missing(field)),
        Some(serde_json::Value::Bool(b)) => Ok(FieldValue::Flag(*b)),
        Some(serde_json::Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(FieldValue::Flag(true)),
            "false" => Ok(FieldValue::Flag(false)),
            _ => Err(wrong_type(field, "a boolean")),
        },
        Some(_) => Err(wrong_type(field, "a boolean")),
    }
}

fn missing(field: &'static str) -> PayloadError {
    PayloadError {
        field,
        problem: FieldProblem::Missing,
    }
}

fn wrong_type(field: &'static str, expected: &'static str) -> PayloadError {
    PayloadError {
        field,
        problem: FieldProblem::WrongType(expected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Quality;
    use serde_json::json;

    #[test]
    fn test_standard_registry_covers_every_stream() {
        let registry = AdapterRegistry::standard();
        for kind in StreamKind::ALL {
            let adapter = registry.get(kind).expect("adapter registered");
            assert_eq!(adapter.kind(), kind);
            assert_eq!(standard_adapter(kind).kind(), kind);
            assert!(adapter.expected_interval_ms() > 0);
        }
    }

    #[test]
    fn test_missing_timestamp_is_validation_error() {
        let record = RawRecord::from_value(StreamKind::HeartRate, json!({ "bpm": 70, "confidence": 0.9 }));
        let err = HeartRateAdapter.parse(3, &record).unwrap_err();
        match err {
            RecordError::Validation(e) => {
                assert_eq!(e.field, "timestamp");
                assert_eq!(e.index, 3);
                assert_eq!(e.problem, FieldProblem::Missing);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_bad_timestamp_is_format_error_with_raw_value() {
        let record = RawRecord::from_value(
            StreamKind::HeartRate,
            json!({ "timestamp": "15 March 2024", "bpm": 70, "confidence": 0.9 }),
        );
        let err = HeartRateAdapter.parse(0, &record).unwrap_err();
        match err {
            RecordError::Format(e) => {
                assert_eq!(e.stream, StreamKind::HeartRate);
                assert_eq!(e.raw, "15 March 2024");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_numeric_text_accepted_for_numbers() {
        let record = RawRecord::from_value(
            StreamKind::HeartRate,
            json!({ "timestamp": "2024-03-15T08:00:00+00:00", "bpm": "72", "confidence": "0.93" }),
        );
        let sample = HeartRateAdapter.parse(0, &record).unwrap();
        assert_eq!(sample.value_f64("bpm"), Some(72.0));
        assert_eq!(sample.quality, Quality::Valid);
    }

    #[test]
    fn test_flag_parsing() {
        let record = RawRecord::from_value(StreamKind::Load, json!({ "hr_derived": "True", "other": 3 }));
        assert_eq!(require_flag(&record, "hr_derived"), Ok(FieldValue::Flag(true)));
        assert_eq!(
            require_flag(&record, "other"),
            Err(wrong_type("other", "a boolean"))
        );
    }
}
