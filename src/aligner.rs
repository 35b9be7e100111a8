//! Multi-stream alignment
//!
//! The aligner builds one canonical time axis and resolves every stream at
//! every axis instant. Resolution per stream and instant:
//!
//! 1. Instants more than the match tolerance before a stream's first sample
//!    or after its last are `missing`.
//! 2. Samples coincident with the instant (within the match tolerance, or the
//!    grid cell under `fixed_grid`) produce a `real` cell. Valid samples are
//!    aggregated; if none of them is valid, the nearest error sample is shown
//!    with its quality marker.
//! 3. Instants inside a detected gap are `missing`.
//! 4. Otherwise each field is filled from the nearest valid neighbours inside
//!    the fill window, by interpolation or carry-forward.
//!
//! Only `valid` samples feed interpolation and aggregation. Equidistant
//! candidates resolve to the earlier sample.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::vec;

use tracing::debug;

use crate::config::{AlignmentStrategy, FillPolicy, SyncConfig};
use crate::error::AlignmentError;
use crate::series::StreamSeries;
use crate::types::{
    AlignedFrame, Aggregation, Cell, FieldCell, FieldKind, FieldSpec, FieldValue, Gap, Instant,
    NormalizedSample, Provenance, Quality, StreamKind,
};

/// Frames produced between two cancellation checks
const CANCEL_CHECK_INTERVAL: usize = 1024;

/// Largest axis a single alignment may build
pub const MAX_AXIS_INSTANTS: u64 = 10_000_000;

/// Cooperative cancellation flag shared with a running alignment
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Aligns stream series onto a canonical axis
#[derive(Debug, Clone)]
pub struct Aligner {
    config: SyncConfig,
}

impl Aligner {
    /// Create an aligner, rejecting unusable configuration up front
    pub fn new(config: SyncConfig) -> Result<Self, AlignmentError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Build the canonical axis for the supplied streams
    pub fn axis(&self, streams: &BTreeMap<StreamKind, StreamSeries>) -> Result<Vec<Instant>, AlignmentError> {
        if streams.is_empty() {
            return Err(AlignmentError::NoStreams);
        }

        let axis = match self.config.strategy {
            AlignmentStrategy::UnionAxis => self.union_axis(streams),
            AlignmentStrategy::FixedGrid => self.grid_axis(streams)?,
            AlignmentStrategy::AnchorStream => {
                let anchor = self
                    .config
                    .anchor_stream
                    .ok_or_else(|| AlignmentError::InvalidConfig("anchor_stream is not set".to_string()))?;
                let series = streams
                    .get(&anchor)
                    .ok_or(AlignmentError::UnknownAnchorStream(anchor))?;
                let mut axis: Vec<Instant> = series.samples().iter().map(|s| s.instant).collect();
                axis.dedup();
                axis
            }
        };

        debug!(
            strategy = ?self.config.strategy,
            instants = axis.len(),
            streams = streams.len(),
            "built alignment axis"
        );
        Ok(axis)
    }

    /// Lazily resolve frames; nothing is computed until the iterator is driven
    pub fn frames<'a>(
        &'a self,
        streams: &'a BTreeMap<StreamKind, StreamSeries>,
    ) -> Result<FrameIter<'a>, AlignmentError> {
        let axis = self.axis(streams)?;
        Ok(FrameIter {
            axis: axis.into_iter(),
            resolver: self.resolver(streams, None),
        })
    }

    /// Align all streams into a complete, ordered frame sequence
    pub fn align(&self, streams: &BTreeMap<StreamKind, StreamSeries>) -> Result<Vec<AlignedFrame>, AlignmentError> {
        self.align_with_cancel(streams, &CancelToken::new())
    }

    /// Like `align`, but abandons the work when `cancel` fires. Partial frames
    /// are dropped; the caller sees either every frame or `Cancelled`.
    pub fn align_with_cancel(
        &self,
        streams: &BTreeMap<StreamKind, StreamSeries>,
        cancel: &CancelToken,
    ) -> Result<Vec<AlignedFrame>, AlignmentError> {
        collect_frames(self.frames(streams)?, cancel)
    }

    /// Per-instant resolver over `streams`, optionally restricted to `only`
    pub(crate) fn resolver<'a>(
        &'a self,
        streams: &'a BTreeMap<StreamKind, StreamSeries>,
        only: Option<&BTreeSet<StreamKind>>,
    ) -> FrameResolver<'a> {
        let views = streams
            .values()
            .filter(|series| only.map_or(true, |set| set.contains(&series.kind())))
            .map(|series| StreamView::new(series, &self.config))
            .collect();
        FrameResolver { aligner: self, views }
    }

    fn union_axis(&self, streams: &BTreeMap<StreamKind, StreamSeries>) -> Vec<Instant> {
        let mut instants: Vec<Instant> = streams
            .values()
            .flat_map(|series| series.samples().iter().map(|s| s.instant))
            .collect();
        instants.sort_unstable();

        let tolerance = self.config.match_tolerance_ms;
        let mut axis: Vec<Instant> = Vec::with_capacity(instants.len());
        for instant in instants {
            match axis.last() {
                Some(kept) if instant.millis_since(*kept) <= tolerance => {}
                _ => axis.push(instant),
            }
        }
        axis
    }

    fn grid_axis(&self, streams: &BTreeMap<StreamKind, StreamSeries>) -> Result<Vec<Instant>, AlignmentError> {
        let start = streams.values().filter_map(StreamSeries::first_instant).min();
        let end = streams.values().filter_map(StreamSeries::last_instant).max();
        let (Some(start), Some(end)) = (start, end) else {
            return Ok(Vec::new());
        };

        let step = self.config.grid_interval_ms;
        let span = i128::from(end.as_millis()) - i128::from(start.as_millis());
        let instants = span / i128::from(step) + 1;
        if instants > i128::from(MAX_AXIS_INSTANTS) {
            return Err(AlignmentError::AxisTooLarge {
                instants: u64::try_from(instants).unwrap_or(u64::MAX),
                limit: MAX_AXIS_INSTANTS,
            });
        }

        // start + k * step never passes end, so this cannot overflow
        Ok((0..instants as i64)
            .map(|k| Instant::from_millis(start.as_millis() + k * step))
            .collect())
    }

    /// Half-open millisecond range of samples coincident with `t`
    fn bucket(&self, t: Instant) -> (i64, i64) {
        let t = t.as_millis();
        let window = self.config.max_fill_window_ms;

        let (lo, hi) = match self.config.strategy {
            // Grid cells tile the time line, so a sample lands in exactly one frame
            AlignmentStrategy::FixedGrid => {
                let lo = t.saturating_sub(self.config.grid_interval_ms / 2);
                (lo, lo.saturating_add(self.config.grid_interval_ms))
            }
            _ => {
                let tolerance = self.config.match_tolerance_ms;
                (t.saturating_sub(tolerance), t.saturating_add(tolerance).saturating_add(1))
            }
        };

        (
            lo.max(t.saturating_sub(window)),
            hi.min(t.saturating_add(window).saturating_add(1)),
        )
    }
}

/// Resolves whole frames at arbitrary axis instants
pub(crate) struct FrameResolver<'a> {
    aligner: &'a Aligner,
    views: Vec<StreamView<'a>>,
}

impl FrameResolver<'_> {
    pub(crate) fn frame(&self, instant: Instant) -> AlignedFrame {
        let config = &self.aligner.config;
        let bucket = self.aligner.bucket(instant);
        let cells = self
            .views
            .iter()
            .map(|view| {
                let cell = view.resolve(instant, bucket, config.match_tolerance_ms, config.max_fill_window_ms);
                (view.kind, cell)
            })
            .collect();

        AlignedFrame { instant, cells }
    }
}

/// Borrowed view of one stream, prepared for per-instant lookups
struct StreamView<'a> {
    kind: StreamKind,
    samples: &'a [NormalizedSample],
    gaps: &'a [Gap],
    /// Indices of samples usable as interpolation/aggregation inputs
    usable: Vec<usize>,
    fields: Vec<(FieldSpec, FillPolicy)>,
}

impl<'a> StreamView<'a> {
    fn new(series: &'a StreamSeries, config: &SyncConfig) -> Self {
        let samples = series.samples();
        let usable = samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.quality.is_valid())
            .map(|(i, _)| i)
            .collect();
        let fields = series
            .profile()
            .fields
            .iter()
            .map(|spec| (*spec, config.fill_policy(series.kind(), spec)))
            .collect();

        Self {
            kind: series.kind(),
            samples,
            gaps: series.gaps(),
            usable,
            fields,
        }
    }

    fn resolve(&self, t: Instant, bucket: (i64, i64), tolerance_ms: i64, window_ms: i64) -> Cell {
        let (first, last) = match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => (first.instant, last.instant),
            _ => return Cell::missing(),
        };
        if t.millis_since(first) < -tolerance_ms || t.millis_since(last) > tolerance_ms {
            return Cell::missing();
        }

        let start = self.samples.partition_point(|s| s.instant.as_millis() < bucket.0);
        let end = self.samples.partition_point(|s| s.instant.as_millis() < bucket.1);
        if start < end {
            return self.real_cell(t, &self.samples[start..end]);
        }

        if t < first || t > last || self.in_gap(t) {
            return Cell::missing();
        }

        self.filled_cell(t, window_ms)
    }

    /// Whether `t` falls strictly inside a detected outage
    fn in_gap(&self, t: Instant) -> bool {
        let after = self.gaps.partition_point(|gap| gap.start < t);
        after > 0 && self.gaps[after - 1].end > t
    }

    fn real_cell(&self, t: Instant, coincident: &[NormalizedSample]) -> Cell {
        let valid: Vec<&NormalizedSample> = coincident.iter().filter(|s| s.quality.is_valid()).collect();

        if valid.is_empty() {
            // Show the reading anyway so the error is visible on the timeline
            let Some(nearest) = nearest(t, coincident.iter()) else {
                return Cell::missing();
            };
            let fields = self
                .fields
                .iter()
                .filter_map(|(spec, _)| {
                    nearest
                        .field(spec.name)
                        .map(|value| (spec.name.to_string(), real_field(value.clone())))
                })
                .collect();
            return Cell {
                provenance: Provenance::Real,
                quality: Some(nearest.quality),
                source: Some(nearest.instant),
                fields,
            };
        }

        let fields = self
            .fields
            .iter()
            .filter_map(|(spec, _)| {
                let value = match spec.aggregation {
                    Aggregation::Mean => mean(spec.name, &valid),
                    Aggregation::MostRecent => most_recent(spec.name, &valid),
                }?;
                Some((spec.name.to_string(), real_field(value)))
            })
            .collect();

        Cell {
            provenance: Provenance::Real,
            quality: Some(Quality::Valid),
            source: nearest(t, valid.iter().copied()).map(|s| s.instant),
            fields,
        }
    }

    fn filled_cell(&self, t: Instant, window_ms: i64) -> Cell {
        // Usable samples strictly before and after t, limited to the window
        let split = self.usable.partition_point(|&i| self.samples[i].instant < t);
        let prev = split
            .checked_sub(1)
            .map(|i| &self.samples[self.usable[i]])
            .filter(|s| t.millis_since(s.instant) <= window_ms);
        let next = self.usable[split..]
            .iter()
            .map(|&i| &self.samples[i])
            .find(|s| s.instant > t)
            .filter(|s| s.instant.millis_since(t) <= window_ms);

        let mut fields = BTreeMap::new();
        for (spec, policy) in &self.fields {
            let policy = match (policy, spec.kind) {
                (FillPolicy::Interpolate, FieldKind::Categorical) => FillPolicy::ForwardFill,
                (policy, _) => *policy,
            };

            let filled = match policy {
                FillPolicy::Interpolate => prev.zip(next).and_then(|(a, b)| {
                    interpolate(t, a, b, spec.name).map(|value| FieldCell {
                        value: FieldValue::Number(value),
                        provenance: Provenance::Interpolated,
                    })
                }),
                FillPolicy::ForwardFill => prev
                    .and_then(|a| a.field(spec.name))
                    .filter(|value| !value.is_null())
                    .map(|value| FieldCell {
                        value: value.clone(),
                        provenance: Provenance::ForwardFilled,
                    }),
                FillPolicy::FlagMissing => None,
            };

            if let Some(cell) = filled {
                fields.insert(spec.name.to_string(), cell);
            }
        }

        let provenance = if fields.values().any(|f| f.provenance == Provenance::Interpolated) {
            Provenance::Interpolated
        } else if fields.is_empty() {
            return Cell::missing();
        } else {
            Provenance::ForwardFilled
        };

        Cell {
            provenance,
            quality: None,
            source: None,
            fields,
        }
    }
}

/// Lazy frame producer over a fixed axis
pub struct FrameIter<'a> {
    axis: vec::IntoIter<Instant>,
    resolver: FrameResolver<'a>,
}

impl Iterator for FrameIter<'_> {
    type Item = AlignedFrame;

    fn next(&mut self) -> Option<Self::Item> {
        let instant = self.axis.next()?;
        Some(self.resolver.frame(instant))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.axis.size_hint()
    }
}

impl ExactSizeIterator for FrameIter<'_> {}

/// Drain `frames`, giving up with `Cancelled` as soon as `cancel` is seen
fn collect_frames<I>(frames: I, cancel: &CancelToken) -> Result<Vec<AlignedFrame>, AlignmentError>
where
    I: ExactSizeIterator<Item = AlignedFrame>,
{
    let mut aligned = Vec::with_capacity(frames.len());
    for (i, frame) in frames.enumerate() {
        if i % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
            return Err(AlignmentError::Cancelled);
        }
        aligned.push(frame);
    }

    if cancel.is_cancelled() {
        return Err(AlignmentError::Cancelled);
    }
    Ok(aligned)
}

fn real_field(value: FieldValue) -> FieldCell {
    FieldCell {
        value,
        provenance: Provenance::Real,
    }
}

/// Sample closest to `t`; the first (earliest) one wins ties
fn nearest<'s, I>(t: Instant, samples: I) -> Option<&'s NormalizedSample>
where
    I: Iterator<Item = &'s NormalizedSample>,
{
    samples.min_by_key(|s| s.instant.millis_since(t).unsigned_abs())
}

fn mean(field: &str, samples: &[&NormalizedSample]) -> Option<FieldValue> {
    let (sum, count) = samples
        .iter()
        .filter_map(|s| s.value_f64(field))
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| FieldValue::Number(sum / count as f64))
}

fn most_recent(field: &str, samples: &[&NormalizedSample]) -> Option<FieldValue> {
    samples
        .iter()
        .rev()
        .filter_map(|s| s.field(field))
        .find(|value| !value.is_null())
        .cloned()
}

fn interpolate(t: Instant, a: &NormalizedSample, b: &NormalizedSample, field: &str) -> Option<f64> {
    let (va, vb) = (a.value_f64(field)?, b.value_f64(field)?);
    let span = b.instant.millis_since(a.instant);
    if span <= 0 {
        return Some(va);
    }
    let ratio = t.millis_since(a.instant) as f64 / span as f64;
    Some(va + (vb - va) * ratio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{standard_adapter, StreamAdapter};
    use crate::types::Payload;
    use pretty_assertions::assert_eq;

    fn sample(stream: StreamKind, millis: i64, fields: &[(&str, FieldValue)], quality: Quality) -> NormalizedSample {
        let fields: Payload = fields
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        NormalizedSample {
            stream,
            instant: Instant::from_millis(millis),
            fields,
            quality,
        }
    }

    fn num(v: f64) -> FieldValue {
        FieldValue::Number(v)
    }

    fn text(v: &str) -> FieldValue {
        FieldValue::Text(v.to_string())
    }

    fn hr_series(seconds: impl IntoIterator<Item = i64>) -> StreamSeries {
        let samples = seconds
            .into_iter()
            .map(|s| sample(StreamKind::HeartRate, s * 1_000, &[("bpm", num(70.0))], Quality::Valid))
            .collect();
        series(StreamKind::HeartRate, samples)
    }

    fn temp(millis: i64, celsius: f64, quality: Quality) -> NormalizedSample {
        sample(
            StreamKind::SkinTemperature,
            millis,
            &[("temp_celsius", num(celsius))],
            quality,
        )
    }

    fn series(kind: StreamKind, samples: Vec<NormalizedSample>) -> StreamSeries {
        StreamSeries::new(standard_adapter(kind).profile(), samples, 2.0)
    }

    fn streams(list: Vec<StreamSeries>) -> BTreeMap<StreamKind, StreamSeries> {
        list.into_iter().map(|s| (s.kind(), s)).collect()
    }

    fn cell_at(frames: &[AlignedFrame], millis: i64, stream: StreamKind) -> &Cell {
        frames
            .iter()
            .find(|f| f.instant.as_millis() == millis)
            .and_then(|f| f.cell(stream))
            .expect("frame and cell present")
    }

    #[test]
    fn test_interpolation_exact_midpoint() {
        let input = streams(vec![
            hr_series([0, 5, 10]),
            series(
                StreamKind::SkinTemperature,
                vec![temp(0, 36.0, Quality::Valid), temp(10_000, 37.0, Quality::Valid)],
            ),
        ]);

        let frames = Aligner::new(SyncConfig::default()).unwrap().align(&input).unwrap();
        assert_eq!(frames.len(), 3);

        let cell = cell_at(&frames, 5_000, StreamKind::SkinTemperature);
        assert_eq!(cell.provenance, Provenance::Interpolated);
        assert_eq!(cell.value_f64("temp_celsius"), Some(36.5));
        assert_eq!(cell.quality, None);

        let cell = cell_at(&frames, 10_000, StreamKind::SkinTemperature);
        assert_eq!(cell.provenance, Provenance::Real);
        assert_eq!(cell.value_f64("temp_celsius"), Some(37.0));
        assert_eq!(cell.source, Some(Instant::from_millis(10_000)));
    }

    #[test]
    fn test_no_extrapolation_past_boundaries() {
        let input = streams(vec![
            hr_series(0..=20),
            series(
                StreamKind::SkinTemperature,
                vec![temp(5_000, 36.0, Quality::Valid), temp(15_000, 37.0, Quality::Valid)],
            ),
        ]);

        let frames = Aligner::new(SyncConfig::default()).unwrap().align(&input).unwrap();
        for frame in &frames {
            let seconds = frame.instant.as_millis() / 1_000;
            let cell = frame.cell(StreamKind::SkinTemperature).unwrap();
            assert_eq!(
                cell.is_missing(),
                !(5..=15).contains(&seconds),
                "unexpected provenance at {seconds}s"
            );
        }
    }

    #[test]
    fn test_error_sample_visible_but_not_interpolated() {
        let input = streams(vec![
            hr_series([0, 4, 5, 10]),
            series(
                StreamKind::SkinTemperature,
                vec![
                    temp(0, 36.0, Quality::Valid),
                    temp(5_000, 45.0, Quality::OutOfRange),
                    temp(10_000, 37.0, Quality::Valid),
                ],
            ),
        ]);

        let frames = Aligner::new(SyncConfig::default()).unwrap().align(&input).unwrap();

        let error_cell = cell_at(&frames, 5_000, StreamKind::SkinTemperature);
        assert_eq!(error_cell.provenance, Provenance::Real);
        assert_eq!(error_cell.quality, Some(Quality::OutOfRange));
        assert_eq!(error_cell.value_f64("temp_celsius"), Some(45.0));

        let between = cell_at(&frames, 4_000, StreamKind::SkinTemperature);
        assert_eq!(between.provenance, Provenance::Interpolated);
        let value = between.value_f64("temp_celsius").unwrap();
        assert!((value - 36.4).abs() < 1e-9, "got {value}");
    }

    #[test]
    fn test_sensor_error_reported_with_marker() {
        let input = streams(vec![series(
            StreamKind::HeartRate,
            vec![
                sample(StreamKind::HeartRate, 0, &[("bpm", num(70.0))], Quality::Valid),
                sample(StreamKind::HeartRate, 1_000, &[("bpm", num(-1.0))], Quality::SensorError),
            ],
        )]);

        let frames = Aligner::new(SyncConfig::default()).unwrap().align(&input).unwrap();
        let cell = cell_at(&frames, 1_000, StreamKind::HeartRate);
        assert_eq!(cell.provenance, Provenance::Real);
        assert_eq!(cell.quality, Some(Quality::SensorError));
        assert_eq!(cell.value_f64("bpm"), Some(-1.0));
    }

    #[test]
    fn test_grid_bucket_aggregates_and_ties_resolve_earlier() {
        let movement = |millis: i64, x: f64| {
            sample(
                StreamKind::Movement,
                millis,
                &[("x", num(x)), ("y", num(0.0)), ("z", num(1.0)), ("magnitude", num(1.0))],
                Quality::Valid,
            )
        };
        let load = |millis: i64, score: f64, activity: &str| {
            sample(
                StreamKind::Load,
                millis,
                &[
                    ("load_score", num(score)),
                    ("activity_type", text(activity)),
                    ("hr_derived", FieldValue::Flag(false)),
                ],
                Quality::Valid,
            )
        };

        let input = streams(vec![
            hr_series([0, 2]),
            series(
                StreamKind::Movement,
                vec![movement(900, 1.0), movement(1_000, 2.0), movement(1_100, 3.0)],
            ),
            series(
                StreamKind::Load,
                vec![load(800, 10.0, "walking"), load(1_200, 20.0, "running")],
            ),
        ]);

        let frames = Aligner::new(SyncConfig::fixed_grid(1_000)).unwrap().align(&input).unwrap();
        let instants: Vec<i64> = frames.iter().map(|f| f.instant.as_millis()).collect();
        assert_eq!(instants, vec![0, 1_000, 2_000]);

        let cell = cell_at(&frames, 1_000, StreamKind::Movement);
        assert_eq!(cell.provenance, Provenance::Real);
        assert_eq!(cell.value_f64("x"), Some(2.0));
        assert_eq!(cell.source, Some(Instant::from_millis(1_000)));

        let cell = cell_at(&frames, 1_000, StreamKind::Load);
        assert_eq!(cell.value_f64("load_score"), Some(15.0));
        assert_eq!(cell.value("activity_type"), Some(&text("running")));
        assert_eq!(cell.source, Some(Instant::from_millis(800)));

        assert!(cell_at(&frames, 0, StreamKind::Movement).is_missing());
        assert!(cell_at(&frames, 2_000, StreamKind::Movement).is_missing());
    }

    #[test]
    fn test_categorical_fields_carry_forward() {
        let load = |millis: i64, score: f64, activity: &str| {
            sample(
                StreamKind::Load,
                millis,
                &[
                    ("load_score", num(score)),
                    ("activity_type", text(activity)),
                    ("hr_derived", FieldValue::Flag(true)),
                ],
                Quality::Valid,
            )
        };
        let input = streams(vec![
            hr_series([0, 5, 10]),
            series(
                StreamKind::Load,
                vec![load(0, 10.0, "walking"), load(10_000, 20.0, "running")],
            ),
        ]);

        let frames = Aligner::new(SyncConfig::default()).unwrap().align(&input).unwrap();
        let cell = cell_at(&frames, 5_000, StreamKind::Load);

        assert_eq!(cell.provenance, Provenance::Interpolated);
        assert_eq!(cell.value_f64("load_score"), Some(15.0));
        assert_eq!(
            cell.fields.get("activity_type"),
            Some(&FieldCell {
                value: text("walking"),
                provenance: Provenance::ForwardFilled,
            })
        );
        assert_eq!(cell.value("hr_derived"), Some(&FieldValue::Flag(true)));
    }

    #[test]
    fn test_fill_window_limits_neighbours() {
        // A generous gap multiplier keeps the 60 s spacing from counting as an outage
        let temps = StreamSeries::new(
            standard_adapter(StreamKind::SkinTemperature).profile(),
            vec![temp(0, 36.0, Quality::Valid), temp(60_000, 37.0, Quality::Valid)],
            10.0,
        );
        let input = streams(vec![hr_series([0, 20, 30, 60]), temps]);

        let frames = Aligner::new(SyncConfig::default()).unwrap().align(&input).unwrap();
        assert!(cell_at(&frames, 20_000, StreamKind::SkinTemperature).is_missing());
        assert_eq!(
            cell_at(&frames, 30_000, StreamKind::SkinTemperature).value_f64("temp_celsius"),
            Some(36.5)
        );

        let config = SyncConfig::default().with_fill_policy("temp_celsius", FillPolicy::ForwardFill);
        let frames = Aligner::new(config).unwrap().align(&input).unwrap();
        let cell = cell_at(&frames, 20_000, StreamKind::SkinTemperature);
        assert_eq!(cell.provenance, Provenance::ForwardFilled);
        assert_eq!(cell.value_f64("temp_celsius"), Some(36.0));
    }

    #[test]
    fn test_detected_gap_is_not_bridged() {
        // Heart rate drops out for 20 s; both neighbours sit inside the 30 s fill window
        let temps = series(
            StreamKind::SkinTemperature,
            (0..=3).map(|i| temp(i * 10_000, 36.0, Quality::Valid)).collect(),
        );
        let input = streams(vec![hr_series((0..=5).chain(25..=30)), temps]);
        assert_eq!(input[&StreamKind::HeartRate].gaps().len(), 1);

        let config = SyncConfig::anchored(StreamKind::SkinTemperature);
        let frames = Aligner::new(config.clone()).unwrap().align(&input).unwrap();
        assert_eq!(cell_at(&frames, 0, StreamKind::HeartRate).provenance, Provenance::Real);
        assert!(cell_at(&frames, 10_000, StreamKind::HeartRate).is_missing());
        assert!(cell_at(&frames, 20_000, StreamKind::HeartRate).is_missing());
        assert_eq!(cell_at(&frames, 30_000, StreamKind::HeartRate).provenance, Provenance::Real);

        let forward = config.with_fill_policy("bpm", FillPolicy::ForwardFill);
        let frames = Aligner::new(forward).unwrap().align(&input).unwrap();
        assert!(cell_at(&frames, 10_000, StreamKind::HeartRate).is_missing());
    }

    #[test]
    fn test_grid_instant_before_first_sample_is_missing() {
        let input = streams(vec![
            hr_series(0..=3),
            series(
                StreamKind::SkinTemperature,
                vec![temp(1_400, 36.0, Quality::Valid), temp(2_400, 36.4, Quality::Valid)],
            ),
        ]);

        let frames = Aligner::new(SyncConfig::fixed_grid(1_000)).unwrap().align(&input).unwrap();
        assert!(cell_at(&frames, 1_000, StreamKind::SkinTemperature).is_missing());

        let cell = cell_at(&frames, 2_000, StreamKind::SkinTemperature);
        assert_eq!(cell.provenance, Provenance::Real);
        assert_eq!(cell.source, Some(Instant::from_millis(2_400)));

        assert!(cell_at(&frames, 3_000, StreamKind::SkinTemperature).is_missing());
    }

    #[test]
    fn test_grid_cells_do_not_share_samples() {
        let movement = |millis: i64, x: f64| {
            sample(
                StreamKind::Movement,
                millis,
                &[("x", num(x)), ("y", num(0.0)), ("z", num(1.0)), ("magnitude", num(1.0))],
                Quality::Valid,
            )
        };
        let input = streams(vec![series(
            StreamKind::Movement,
            vec![movement(0, 1.0), movement(150, 2.0), movement(300, 3.0)],
        )]);

        let config = SyncConfig::fixed_grid(100).with_match_tolerance(50);
        let frames = Aligner::new(config).unwrap().align(&input).unwrap();
        let instants: Vec<i64> = frames.iter().map(|f| f.instant.as_millis()).collect();
        assert_eq!(instants, vec![0, 100, 200, 300]);

        let holders: Vec<i64> = frames
            .iter()
            .filter(|f| f.cell(StreamKind::Movement).unwrap().source == Some(Instant::from_millis(150)))
            .map(|f| f.instant.as_millis())
            .collect();
        assert_eq!(holders, vec![200]);
        assert_eq!(
            cell_at(&frames, 100, StreamKind::Movement).provenance,
            Provenance::Interpolated
        );
    }

    #[test]
    fn test_oversized_grid_is_rejected() {
        let input = streams(vec![hr_series([0, 2_000_000_000])]);
        let aligner = Aligner::new(SyncConfig::fixed_grid(1_000)).unwrap();
        assert!(matches!(
            aligner.axis(&input),
            Err(AlignmentError::AxisTooLarge { limit: MAX_AXIS_INSTANTS, .. })
        ));
    }

    #[test]
    fn test_flag_missing_policy() {
        let input = streams(vec![
            hr_series([0, 5, 10]),
            series(
                StreamKind::SkinTemperature,
                vec![temp(0, 36.0, Quality::Valid), temp(10_000, 37.0, Quality::Valid)],
            ),
        ]);
        let config = SyncConfig::default().with_fill_policy("skin_temperature.temp_celsius", FillPolicy::FlagMissing);

        let frames = Aligner::new(config).unwrap().align(&input).unwrap();
        assert!(cell_at(&frames, 5_000, StreamKind::SkinTemperature).is_missing());
        assert!(!cell_at(&frames, 10_000, StreamKind::SkinTemperature).is_missing());
    }

    #[test]
    fn test_union_axis_merges_jitter() {
        let input = streams(vec![
            series(
                StreamKind::HeartRate,
                vec![sample(StreamKind::HeartRate, 1_000, &[("bpm", num(70.0))], Quality::Valid)],
            ),
            series(
                StreamKind::SkinTemperature,
                vec![temp(1_020, 36.0, Quality::Valid), temp(1_100, 36.2, Quality::Valid)],
            ),
        ]);

        let aligner = Aligner::new(SyncConfig::union_axis()).unwrap();
        let axis: Vec<i64> = aligner.axis(&input).unwrap().iter().map(|i| i.as_millis()).collect();
        assert_eq!(axis, vec![1_000, 1_100]);

        let frames = aligner.align(&input).unwrap();
        let cell = cell_at(&frames, 1_000, StreamKind::SkinTemperature);
        assert_eq!(cell.provenance, Provenance::Real);
        assert_eq!(cell.source, Some(Instant::from_millis(1_020)));
    }

    #[test]
    fn test_empty_stream_is_all_missing() {
        let input = streams(vec![hr_series(0..5), series(StreamKind::BloodOxygen, Vec::new())]);
        let frames = Aligner::new(SyncConfig::default()).unwrap().align(&input).unwrap();

        assert_eq!(frames.len(), 5);
        assert!(frames
            .iter()
            .all(|f| f.cell(StreamKind::BloodOxygen).is_some_and(Cell::is_missing)));
    }

    #[test]
    fn test_request_errors() {
        let aligner = Aligner::new(SyncConfig::default()).unwrap();
        assert_eq!(aligner.align(&BTreeMap::new()), Err(AlignmentError::NoStreams));

        let input = streams(vec![hr_series(0..3)]);
        let anchored = Aligner::new(SyncConfig::anchored(StreamKind::Movement)).unwrap();
        assert_eq!(
            anchored.align(&input),
            Err(AlignmentError::UnknownAnchorStream(StreamKind::Movement))
        );

        assert!(matches!(
            Aligner::new(SyncConfig::fixed_grid(-5)),
            Err(AlignmentError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_cancelled_alignment_returns_nothing() {
        let input = streams(vec![hr_series(0..10)]);
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = Aligner::new(SyncConfig::default())
            .unwrap()
            .align_with_cancel(&input, &cancel);
        assert_eq!(result, Err(AlignmentError::Cancelled));
    }

    #[test]
    fn test_cancel_mid_alignment_returns_no_frames() {
        let input = streams(vec![hr_series(0..5_000)]);
        let aligner = Aligner::new(SyncConfig::default()).unwrap();
        let cancel = CancelToken::new();
        let mut produced = 0;

        let frames = aligner.frames(&input).unwrap().inspect(|_| {
            produced += 1;
            if produced == 1_500 {
                cancel.cancel();
            }
        });
        let result = collect_frames(frames, &cancel);

        assert_eq!(result, Err(AlignmentError::Cancelled));
        assert!(produced > CANCEL_CHECK_INTERVAL, "cancelled before the run started");
        assert!(produced < 5_000, "ran to completion before stopping");
    }

    #[test]
    fn test_frames_are_lazy_and_ordered() {
        let input = streams(vec![hr_series([3, 1, 2, 2])]);
        let aligner = Aligner::new(SyncConfig::default()).unwrap();
        let frames = aligner.frames(&input).unwrap();

        assert_eq!(frames.len(), 3);
        let instants: Vec<i64> = frames.map(|f| f.instant.as_millis()).collect();
        assert_eq!(instants, vec![1_000, 2_000, 3_000]);
    }
}
