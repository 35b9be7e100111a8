//! Blood oxygen adapter
//!
//! Rows of `time,spo2,pulse_quality`. Timestamps are integer Unix *seconds*,
//! a different unit from the movement stream.

use crate::normalizer::TimestampFormat;
use crate::quality::QualityRules;
use crate::types::{FieldSpec, Payload, RawRecord, StreamKind, ValueRange};

use super::{require_number, require_text, PayloadError, StreamAdapter};

static FIELDS: [FieldSpec; 2] = [
    FieldSpec::continuous("spo2"),
    FieldSpec::categorical("pulse_quality"),
];

static RULES: QualityRules = QualityRules {
    sentinels: &[],
    range: Some(ValueRange {
        field: "spo2",
        min: 85.0,
        max: 100.0,
    }),
    confidence: None,
};

/// Blood oxygen stream adapter (~0.5 Hz)
pub struct BloodOxygenAdapter;

impl StreamAdapter for BloodOxygenAdapter {
    fn kind(&self) -> StreamKind {
        StreamKind::BloodOxygen
    }

    fn timestamp_field(&self) -> &'static str {
        "time"
    }

    fn timestamp_format(&self) -> TimestampFormat {
        TimestampFormat::UnixSeconds
    }

    fn expected_interval_ms(&self) -> i64 {
        2_000
    }

    fn fields(&self) -> &'static [FieldSpec] {
        &FIELDS
    }

    fn quality_rules(&self) -> &'static QualityRules {
        &RULES
    }

    fn extract_payload(&self, record: &RawRecord) -> Result<Payload, PayloadError> {
        let mut payload = Payload::new();
        payload.insert("spo2".to_string(), require_number(record, "spo2")?);
        payload.insert("pulse_quality".to_string(), require_text(record, "pulse_quality")?);
        Ok(payload)
    }
}
