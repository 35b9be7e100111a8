//! Skin temperature adapter
//!
//! Rows of `recorded_at,temp_celsius,ambient_temp`. Timestamps are ISO 8601
//! with an explicit offset (devices report local time), which is applied.

use crate::normalizer::TimestampFormat;
use crate::quality::QualityRules;
use crate::types::{FieldSpec, Payload, RawRecord, StreamKind, ValueRange};

use super::{optional_number, require_number, PayloadError, StreamAdapter};

static FIELDS: [FieldSpec; 2] = [
    FieldSpec::continuous("temp_celsius"),
    FieldSpec::continuous("ambient_temp"),
];

static RULES: QualityRules = QualityRules {
    sentinels: &[],
    range: Some(ValueRange {
        field: "temp_celsius",
        min: 34.0,
        max: 42.0,
    }),
    confidence: None,
};

/// Skin temperature stream adapter (~0.1 Hz)
pub struct SkinTemperatureAdapter;

impl StreamAdapter for SkinTemperatureAdapter {
    fn kind(&self) -> StreamKind {
        StreamKind::SkinTemperature
    }

    fn timestamp_field(&self) -> &'static str {
        "recorded_at"
    }

    fn timestamp_format(&self) -> TimestampFormat {
        TimestampFormat::Iso8601
    }

    fn expected_interval_ms(&self) -> i64 {
        10_000
    }

    fn fields(&self) -> &'static [FieldSpec] {
        &FIELDS
    }

    fn quality_rules(&self) -> &'static QualityRules {
        &RULES
    }

    fn extract_payload(&self, record: &RawRecord) -> Result<Payload, PayloadError> {
        let mut payload = Payload::new();
        payload.insert("temp_celsius".to_string(), require_number(record, "temp_celsius")?);
        payload.insert("ambient_temp".to_string(), optional_number(record, "ambient_temp")?);
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Quality;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> crate::types::NormalizedSample {
        SkinTemperatureAdapter
            .parse(0, &RawRecord::from_value(StreamKind::SkinTemperature, value))
            .unwrap()
    }

    #[test]
    fn test_offset_is_applied() {
        let sample = parse(json!({
            "recorded_at": "2024-03-15T02:45:00-05:00",
            "temp_celsius": 36.52,
            "ambient_temp": 21.4
        }));
        // 02:45 EST is 07:45 UTC
        assert_eq!(sample.instant.to_string(), "2024-03-15T07:45:00.000Z");
        assert_eq!(sample.quality, Quality::Valid);
    }

    #[test]
    fn test_contact_spike_out_of_range() {
        let spike = parse(json!({ "recorded_at": "2024-03-15T08:00:00Z", "temp_celsius": 43.1 }));
        let lift_off = parse(json!({ "recorded_at": "2024-03-15T08:00:00Z", "temp_celsius": 31.9 }));
        assert_eq!(spike.quality, Quality::OutOfRange);
        assert_eq!(lift_off.quality, Quality::OutOfRange);
    }
}
