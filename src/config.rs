//! Alignment configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{AlignmentError, SyncError};
use crate::gaps::DEFAULT_GAP_MULTIPLIER;
use crate::types::{FieldKind, FieldSpec, StreamKind};

/// How the canonical time axis is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentStrategy {
    /// Every distinct sample instant across all streams
    UnionAxis,
    /// Evenly spaced instants from the earliest to the latest sample
    FixedGrid,
    /// The anchor stream's own instants
    #[default]
    AnchorStream,
}

/// How a field is filled at axis instants without a coincident sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillPolicy {
    /// Linear interpolation between neighbours (continuous fields only)
    Interpolate,
    /// Carry the previous value forward
    ForwardFill,
    /// Leave the field missing
    FlagMissing,
}

impl FillPolicy {
    /// Default for a field kind
    pub fn for_kind(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Continuous => FillPolicy::Interpolate,
            FieldKind::Categorical => FillPolicy::ForwardFill,
        }
    }
}

/// Configuration for one alignment request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub strategy: AlignmentStrategy,

    /// Grid spacing for `fixed_grid`
    #[serde(alias = "grid_interval")]
    pub grid_interval_ms: i64,

    /// Stream whose instants form the axis for `anchor_stream`
    pub anchor_stream: Option<StreamKind>,

    /// Gap threshold as a multiple of each stream's expected interval
    pub gap_threshold_multiplier: f64,

    /// How far a neighbour may be from the target instant and still be used
    #[serde(alias = "max_fill_window")]
    pub max_fill_window_ms: i64,

    /// Instants closer than this are the same instant (clock jitter)
    pub match_tolerance_ms: i64,

    /// Overrides keyed `"<stream>.<field>"` or `"<field>"`
    pub fill_policy_per_field: BTreeMap<String, FillPolicy>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            strategy: AlignmentStrategy::AnchorStream,
            grid_interval_ms: 1_000,
            anchor_stream: Some(StreamKind::HeartRate),
            gap_threshold_multiplier: DEFAULT_GAP_MULTIPLIER,
            max_fill_window_ms: 30_000,
            match_tolerance_ms: 50,
            fill_policy_per_field: BTreeMap::new(),
        }
    }
}

impl SyncConfig {
    /// Align onto the union of all sample instants
    pub fn union_axis() -> Self {
        Self {
            strategy: AlignmentStrategy::UnionAxis,
            ..Self::default()
        }
    }

    /// Align onto a uniform grid
    pub fn fixed_grid(interval_ms: i64) -> Self {
        Self {
            strategy: AlignmentStrategy::FixedGrid,
            grid_interval_ms: interval_ms,
            ..Self::default()
        }
    }

    /// Align onto one stream's own instants
    pub fn anchored(anchor: StreamKind) -> Self {
        Self {
            strategy: AlignmentStrategy::AnchorStream,
            anchor_stream: Some(anchor),
            ..Self::default()
        }
    }

    pub fn with_max_fill_window(mut self, millis: i64) -> Self {
        self.max_fill_window_ms = millis;
        self
    }

    pub fn with_match_tolerance(mut self, millis: i64) -> Self {
        self.match_tolerance_ms = millis;
        self
    }

    pub fn with_fill_policy(mut self, key: impl Into<String>, policy: FillPolicy) -> Self {
        self.fill_policy_per_field.insert(key.into(), policy);
        self
    }

    /// Parse from JSON; absent options take their defaults
    pub fn from_json(json: &str) -> Result<Self, SyncError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self, SyncError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Check that the options are usable for alignment
    pub fn validate(&self) -> Result<(), AlignmentError> {
        if self.strategy == AlignmentStrategy::FixedGrid && self.grid_interval_ms <= 0 {
            return Err(AlignmentError::InvalidConfig(format!(
                "grid_interval_ms must be positive, got {}",
                self.grid_interval_ms
            )));
        }

        if self.strategy == AlignmentStrategy::AnchorStream && self.anchor_stream.is_none() {
            return Err(AlignmentError::InvalidConfig(
                "anchor_stream strategy requires anchor_stream".to_string(),
            ));
        }

        if !self.gap_threshold_multiplier.is_finite() || self.gap_threshold_multiplier <= 0.0 {
            return Err(AlignmentError::InvalidConfig(format!(
                "gap_threshold_multiplier must be a positive number, got {}",
                self.gap_threshold_multiplier
            )));
        }

        if self.max_fill_window_ms < 0 {
            return Err(AlignmentError::InvalidConfig(format!(
                "max_fill_window_ms must not be negative, got {}",
                self.max_fill_window_ms
            )));
        }

        if self.match_tolerance_ms < 0 {
            return Err(AlignmentError::InvalidConfig(format!(
                "match_tolerance_ms must not be negative, got {}",
                self.match_tolerance_ms
            )));
        }

        for key in self.fill_policy_per_field.keys() {
            if let Some((stream, field)) = key.split_once('.') {
                if stream.parse::<StreamKind>().is_err() || field.is_empty() {
                    return Err(AlignmentError::InvalidConfig(format!(
                        "fill policy key `{key}` does not name a known stream field"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Effective fill policy for a field, after overrides
    pub fn fill_policy(&self, stream: StreamKind, field: &FieldSpec) -> FillPolicy {
        let qualified = format!("{}.{}", stream.as_str(), field.name);
        self.fill_policy_per_field
            .get(&qualified)
            .or_else(|| self.fill_policy_per_field.get(field.name))
            .copied()
            .unwrap_or_else(|| FillPolicy::for_kind(field.kind))
    }
}
