//! Gap detection
//!
//! A gap is a stretch between two time-adjacent samples of one stream that is
//! longer than `multiplier × expected_interval`. Every sample counts,
//! whatever its quality: an error reading still proves the device was
//! reporting. The expected interval is the stream's declared cadence, not
//! one estimated from the data.

use crate::types::{Gap, NormalizedSample, StreamKind};

/// Default factor over the expected interval before a pause counts as a gap
pub const DEFAULT_GAP_MULTIPLIER: f64 = 2.0;

/// Finds gaps in a time-sorted sample sequence
pub struct GapDetector {
    expected_interval_ms: i64,
    multiplier: f64,
}

impl GapDetector {
    pub fn new(expected_interval_ms: i64, multiplier: f64) -> Self {
        Self {
            expected_interval_ms,
            multiplier,
        }
    }

    /// Longest spacing that is still not a gap
    pub fn threshold_ms(&self) -> f64 {
        self.expected_interval_ms as f64 * self.multiplier
    }

    /// Scan `samples` (sorted by instant) and return every gap in order
    pub fn detect(&self, stream: StreamKind, samples: &[NormalizedSample]) -> Vec<Gap> {
        debug_assert!(
            samples.windows(2).all(|pair| pair[0].instant <= pair[1].instant),
            "samples must be sorted by instant"
        );

        let threshold = self.threshold_ms();
        samples
            .windows(2)
            .filter_map(|pair| {
                let (prev, next) = (&pair[0], &pair[1]);
                let duration_ms = next.instant.millis_since(prev.instant);
                (duration_ms as f64 > threshold).then(|| Gap {
                    stream,
                    start: prev.instant,
                    end: next.instant,
                    duration_ms,
                })
            })
            .collect()
    }
}

/// Detect gaps in one stream's sorted samples
pub fn detect_gaps(
    stream: StreamKind,
    samples: &[NormalizedSample],
    expected_interval_ms: i64,
    multiplier: f64,
) -> Vec<Gap> {
    GapDetector::new(expected_interval_ms, multiplier).detect(stream, samples)
}
