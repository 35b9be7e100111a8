//! Physical load adapter
//!
//! Records of `timestamp,load_score,activity_type,hr_derived`. The timestamp
//! field mixes three shapes; see `TimestampFormat::LoadMixed`.

use crate::normalizer::TimestampFormat;
use crate::quality::{QualityRules, Sentinel};
use crate::types::{FieldSpec, Payload, RawRecord, StreamKind};

use super::{require_flag, require_number, require_text, PayloadError, StreamAdapter};

static FIELDS: [FieldSpec; 3] = [
    FieldSpec::continuous("load_score"),
    FieldSpec::categorical("activity_type"),
    FieldSpec::categorical("hr_derived"),
];

static RULES: QualityRules = QualityRules {
    sentinels: &[Sentinel::Equals {
        field: "load_score",
        value: -1.0,
    }],
    range: None,
    confidence: None,
};

/// Load stream adapter (~0.2 Hz)
pub struct LoadAdapter;

impl StreamAdapter for LoadAdapter {
    fn kind(&self) -> StreamKind {
        StreamKind::Load
    }

    fn timestamp_field(&self) -> &'static str {
        "timestamp"
    }

    fn timestamp_format(&self) -> TimestampFormat {
        TimestampFormat::LoadMixed
    }

    fn expected_interval_ms(&self) -> i64 {
        5_000
    }

    fn fields(&self) -> &'static [FieldSpec] {
        &FIELDS
    }

    fn quality_rules(&self) -> &'static QualityRules {
        &RULES
    }

    fn extract_payload(&self, record: &RawRecord) -> Result<Payload, PayloadError> {
        let mut payload = Payload::new();
        payload.insert("load_score".to_string(), require_number(record, "load_score")?);
        payload.insert("activity_type".to_string(), require_text(record, "activity_type")?);
        payload.insert("hr_derived".to_string(), require_flag(record, "hr_derived")?);
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecordError;
    use crate::types::{FieldValue, Quality};
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Result<crate::types::NormalizedSample, RecordError> {
        LoadAdapter.parse(0, &RawRecord::from_value(StreamKind::Load, value))
    }

    #[test]
    fn test_all_timestamp_shapes() {
        let shapes = [
            ("2024-03-15T08:12:08Z", 1_710_490_328_000),
            ("2024-03-15T08:12:08.417Z", 1_710_490_328_417),
            ("2024/03/15 08:12:08", 1_710_490_328_000),
        ];
        for (timestamp, expected) in shapes {
            let sample = parse(json!({
                "timestamp": timestamp,
                "load_score": 31,
                "activity_type": "walk",
                "hr_derived": true
            }))
            .unwrap();
            assert_eq!(sample.instant.as_millis(), expected, "{timestamp}");
        }
    }

    #[test]
    fn test_error_sentinel() {
        let sample = parse(json!({
            "timestamp": "2024-03-15T08:12:08Z",
            "load_score": -1,
            "activity_type": "unknown",
            "hr_derived": false
        }))
        .unwrap();
        assert_eq!(sample.quality, Quality::SensorError);
        assert_eq!(sample.field("hr_derived"), Some(&FieldValue::Flag(false)));
    }

    #[test]
    fn test_timezone_less_iso_rejected() {
        let err = parse(json!({
            "timestamp": "2024-03-15T08:12:08",
            "load_score": 10,
            "activity_type": "rest",
            "hr_derived": true
        }))
        .unwrap_err();
        assert!(matches!(err, RecordError::Format(_)));
    }
}
