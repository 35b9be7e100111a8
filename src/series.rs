//! Per-stream sample sequences
//!
//! A `StreamSeries` owns one stream's sorted, classified samples together with
//! the gaps derived from them. Gaps are recomputed whenever the samples change.

use serde::Serialize;

use crate::gaps::GapDetector;
use crate::types::{Gap, Instant, NormalizedSample, StreamKind, StreamProfile};

/// One stream's samples plus derived gap annotations
#[derive(Debug, Clone, Serialize)]
pub struct StreamSeries {
    profile: StreamProfile,
    samples: Vec<NormalizedSample>,
    gaps: Vec<Gap>,
    gap_multiplier: f64,
}

impl StreamSeries {
    /// Build a series; samples are stably sorted by instant if needed
    pub fn new(profile: StreamProfile, samples: Vec<NormalizedSample>, gap_multiplier: f64) -> Self {
        let mut series = Self {
            profile,
            samples: Vec::new(),
            gaps: Vec::new(),
            gap_multiplier,
        };
        series.replace_samples(samples);
        series
    }

    /// Swap in a new sample set and recompute gaps
    pub fn replace_samples(&mut self, mut samples: Vec<NormalizedSample>) {
        sort_samples(&mut samples);
        self.gaps = GapDetector::new(self.profile.expected_interval_ms, self.gap_multiplier)
            .detect(self.profile.kind, &samples);
        self.samples = samples;
    }

    /// Recompute gaps with a different multiplier
    pub fn set_gap_multiplier(&mut self, multiplier: f64) {
        self.gap_multiplier = multiplier;
        self.gaps = GapDetector::new(self.profile.expected_interval_ms, multiplier)
            .detect(self.profile.kind, &self.samples);
    }

    pub fn kind(&self) -> StreamKind {
        self.profile.kind
    }

    pub fn profile(&self) -> &StreamProfile {
        &self.profile
    }

    pub fn samples(&self) -> &[NormalizedSample] {
        &self.samples
    }

    pub fn gaps(&self) -> &[Gap] {
        &self.gaps
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first_instant(&self) -> Option<Instant> {
        self.samples.first().map(|s| s.instant)
    }

    pub fn last_instant(&self) -> Option<Instant> {
        self.samples.last().map(|s| s.instant)
    }
}

/// Stable sort so duplicate instants keep their arrival order
pub(crate) fn sort_samples(samples: &mut [NormalizedSample]) {
    if samples.windows(2).any(|pair| pair[0].instant > pair[1].instant) {
        samples.sort_by_key(|s| s.instant);
    }
}
