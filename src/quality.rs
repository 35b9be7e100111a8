//! Quality classification
//!
//! Every sample gets exactly one `Quality` tag derived from its stream's rules.
//! Classification is metadata: nothing is dropped or rewritten here.
//!
//! Priority when several rules fire: sensor_error > out_of_range >
//! low_confidence > valid.

use crate::types::{FieldValue, Payload, Quality, ValueRange};

/// Sentinel comparisons tolerate float noise from text round-trips
const SENTINEL_EPSILON: f64 = 1e-6;

/// An explicit error marker a device writes instead of a reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sentinel {
    /// Field holds this exact numeric value
    Equals { field: &'static str, value: f64 },
    /// Field is null or absent
    Null { field: &'static str },
}

impl Sentinel {
    fn matches(&self, payload: &Payload) -> bool {
        match self {
            Sentinel::Equals { field, value } => payload
                .get(*field)
                .and_then(FieldValue::as_f64)
                .is_some_and(|v| (v - value).abs() < SENTINEL_EPSILON),
            Sentinel::Null { field } => payload.get(*field).map_or(true, FieldValue::is_null),
        }
    }
}

/// Minimum acceptable device-reported confidence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceRule {
    pub field: &'static str,
    pub min: f64,
}

/// Classification rules declared by a stream adapter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityRules {
    pub sentinels: &'static [Sentinel],
    pub range: Option<ValueRange>,
    pub confidence: Option<ConfidenceRule>,
}

impl QualityRules {
    /// Rules that accept everything
    pub const NONE: QualityRules = QualityRules {
        sentinels: &[],
        range: None,
        confidence: None,
    };
}

/// Assigns quality tags to sample payloads
pub struct QualityClassifier;

impl QualityClassifier {
    /// Classify a payload against its stream's rules
    pub fn classify(payload: &Payload, rules: &QualityRules) -> Quality {
        if rules.sentinels.iter().any(|sentinel| sentinel.matches(payload)) {
            return Quality::SensorError;
        }

        if let Some(range) = &rules.range {
            if let Some(value) = payload.get(range.field).and_then(FieldValue::as_f64) {
                if !range.contains(value) {
                    return Quality::OutOfRange;
                }
            }
        }

        if let Some(rule) = &rules.confidence {
            if let Some(confidence) = payload.get(rule.field).and_then(FieldValue::as_f64) {
                if confidence < rule.min {
                    return Quality::LowConfidence;
                }
            }
        }

        Quality::Valid
    }
}
