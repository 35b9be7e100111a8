//! Heart rate adapter
//!
//! Rows of `timestamp,bpm,confidence` with ISO 8601 UTC timestamps that may
//! carry fractional seconds.

use crate::normalizer::TimestampFormat;
use crate::quality::{ConfidenceRule, QualityRules, Sentinel};
use crate::types::{FieldSpec, Payload, RawRecord, StreamKind, ValueRange};

use super::{require_number, PayloadError, StreamAdapter};

static FIELDS: [FieldSpec; 2] = [
    FieldSpec::continuous("bpm"),
    FieldSpec::continuous("confidence"),
];

static RULES: QualityRules = QualityRules {
    sentinels: &[Sentinel::Equals {
        field: "bpm",
        value: -1.0,
    }],
    range: Some(ValueRange {
        field: "bpm",
        min: 40.0,
        max: 200.0,
    }),
    confidence: Some(ConfidenceRule {
        field: "confidence",
        min: 0.5,
    }),
};

/// Heart rate stream adapter (1 Hz)
pub struct HeartRateAdapter;

impl StreamAdapter for HeartRateAdapter {
    fn kind(&self) -> StreamKind {
        StreamKind::HeartRate
    }

    fn timestamp_field(&self) -> &'static str {
        "timestamp"
    }

    fn timestamp_format(&self) -> TimestampFormat {
        TimestampFormat::Iso8601
    }

    fn expected_interval_ms(&self) -> i64 {
        1_000
    }

    fn fields(&self) -> &'static [FieldSpec] {
        &FIELDS
    }

    fn quality_rules(&self) -> &'static QualityRules {
        &RULES
    }

    fn extract_payload(&self, record: &RawRecord) -> Result<Payload, PayloadError> {
        let mut payload = Payload::new();
        payload.insert("bpm".to_string(), require_number(record, "bpm")?);
        payload.insert("confidence".to_string(), require_number(record, "confidence")?);
        Ok(payload)
    }
}
