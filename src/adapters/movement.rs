//! Movement (accelerometer) adapter
//!
//! Records of `ts,x,y,z,magnitude` with integer Unix millisecond timestamps.
//! A null axis or the 999.99 marker means the device failed to read.
//! Acceleration has no fixed plausible bound, so there is no range rule.

use crate::normalizer::TimestampFormat;
use crate::quality::{QualityRules, Sentinel};
use crate::types::{FieldSpec, Payload, RawRecord, StreamKind};

use super::{nullable_number, optional_number, PayloadError, StreamAdapter};

/// Value some firmware writes on every axis when the reading is corrupt
const CORRUPT_AXIS: f64 = 999.99;

static FIELDS: [FieldSpec; 4] = [
    FieldSpec::continuous("x"),
    FieldSpec::continuous("y"),
    FieldSpec::continuous("z"),
    FieldSpec::continuous("magnitude"),
];

static RULES: QualityRules = QualityRules {
    sentinels: &[
        Sentinel::Null { field: "x" },
        Sentinel::Null { field: "y" },
        Sentinel::Null { field: "z" },
        Sentinel::Equals {
            field: "x",
            value: CORRUPT_AXIS,
        },
        Sentinel::Equals {
            field: "y",
            value: CORRUPT_AXIS,
        },
        Sentinel::Equals {
            field: "z",
            value: CORRUPT_AXIS,
        },
    ],
    range: None,
    confidence: None,
};

/// Movement stream adapter (~10 Hz)
pub struct MovementAdapter;

impl StreamAdapter for MovementAdapter {
    fn kind(&self) -> StreamKind {
        StreamKind::Movement
    }

    fn timestamp_field(&self) -> &'static str {
        "ts"
    }

    fn timestamp_format(&self) -> TimestampFormat {
        TimestampFormat::UnixMillis
    }

    fn expected_interval_ms(&self) -> i64 {
        100
    }

    fn fields(&self) -> &'static [FieldSpec] {
        &FIELDS
    }

    fn quality_rules(&self) -> &'static QualityRules {
        &RULES
    }

    fn extract_payload(&self, record: &RawRecord) -> Result<Payload, PayloadError> {
        let mut payload = Payload::new();
        for axis in ["x", "y", "z"] {
            payload.insert(axis.to_string(), nullable_number(record, axis)?);
        }
        payload.insert("magnitude".to_string(), optional_number(record, "magnitude")?);
        Ok(payload)
    }
}
