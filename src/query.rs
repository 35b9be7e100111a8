//! Timeline queries
//!
//! `TimelineIndex` holds the finished alignment axis together with the
//! stream series it was built from. Frames are resolved only when a query
//! walks over them, so a caller never has to hold the whole aligned session.
//! Every range lookup is two binary searches over the axis followed by a lazy
//! walk.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::slice;

use crate::aligner::{Aligner, CancelToken, FrameResolver};
use crate::error::AlignmentError;
use crate::series::StreamSeries;
use crate::types::{AlignedFrame, Cell, FieldValue, Instant, Provenance, Quality, StreamKind};

/// Inclusive time range with an optional stream filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery {
    pub from: Instant,
    pub to: Instant,
    /// Restrict frames to these streams; `None` keeps every stream
    pub streams: Option<BTreeSet<StreamKind>>,
}

impl RangeQuery {
    pub fn between(from: Instant, to: Instant) -> Self {
        Self {
            from,
            to,
            streams: None,
        }
    }

    /// Query covering the whole timeline
    pub fn all() -> Self {
        Self::between(Instant::from_millis(i64::MIN), Instant::from_millis(i64::MAX))
    }

    pub fn with_streams(mut self, streams: impl IntoIterator<Item = StreamKind>) -> Self {
        self.streams = Some(streams.into_iter().collect());
        self
    }

    fn keeps(&self, stream: StreamKind) -> bool {
        self.streams.as_ref().map_or(true, |set| set.contains(&stream))
    }
}

/// Read-only, lazily resolved index over an aligned timeline
#[derive(Debug, Clone)]
pub struct TimelineIndex {
    aligner: Aligner,
    axis: Vec<Instant>,
    streams: BTreeMap<StreamKind, StreamSeries>,
}

impl TimelineIndex {
    /// Build the axis for `streams`. No frame is resolved here; the index
    /// exists only once the axis is complete and `cancel` has not fired.
    pub fn build(
        aligner: Aligner,
        streams: BTreeMap<StreamKind, StreamSeries>,
        cancel: &CancelToken,
    ) -> Result<Self, AlignmentError> {
        let axis = aligner.axis(&streams)?;
        if cancel.is_cancelled() {
            return Err(AlignmentError::Cancelled);
        }
        Ok(Self {
            aligner,
            axis,
            streams,
        })
    }

    /// Number of frames on the timeline
    pub fn len(&self) -> usize {
        self.axis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.axis.is_empty()
    }

    pub fn first(&self) -> Option<Instant> {
        self.axis.first().copied()
    }

    pub fn last(&self) -> Option<Instant> {
        self.axis.last().copied()
    }

    pub fn axis(&self) -> &[Instant] {
        &self.axis
    }

    pub fn streams(&self) -> &BTreeMap<StreamKind, StreamSeries> {
        &self.streams
    }

    /// Every frame, in instant order
    pub fn frames(&self) -> RangeIter<'_> {
        self.range(&RangeQuery::all())
    }

    /// Frames whose instant falls in `[from, to]`, in instant order
    pub fn range(&self, query: &RangeQuery) -> RangeIter<'_> {
        let start = self.axis.partition_point(|t| *t < query.from);
        let end = self.axis.partition_point(|t| *t <= query.to).max(start);
        RangeIter {
            axis: self.axis[start..end].iter(),
            resolver: self.aligner.resolver(&self.streams, query.streams.as_ref()),
        }
    }

    /// Forward-only pages of at most `page_size` frames
    pub fn pages(&self, query: &RangeQuery, page_size: usize) -> PageCursor<'_> {
        PageCursor {
            frames: self.range(query),
            page_size: page_size.max(1),
            number: 0,
        }
    }

    /// Per-stream statistics over a range, computed in one pass
    pub fn summarize(&self, query: &RangeQuery) -> RangeSummary {
        let mut streams: BTreeMap<StreamKind, StreamSummary> = self
            .streams
            .keys()
            .filter(|kind| query.keeps(**kind))
            .map(|kind| (*kind, StreamSummary::default()))
            .collect();

        let mut frame_count = 0;
        for frame in self.range(query) {
            frame_count += 1;
            for (kind, cell) in &frame.cells {
                if let Some(summary) = streams.get_mut(kind) {
                    summary.observe(cell);
                }
            }
        }

        for summary in streams.values_mut() {
            summary.finish(frame_count);
        }

        RangeSummary {
            from: query.from,
            to: query.to,
            frame_count,
            streams,
        }
    }
}

/// Lazy iterator over the frames of one range query
pub struct RangeIter<'a> {
    axis: slice::Iter<'a, Instant>,
    resolver: FrameResolver<'a>,
}

impl Iterator for RangeIter<'_> {
    type Item = AlignedFrame;

    fn next(&mut self) -> Option<Self::Item> {
        let instant = *self.axis.next()?;
        Some(self.resolver.frame(instant))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.axis.size_hint()
    }
}

impl ExactSizeIterator for RangeIter<'_> {}

/// One page of frames
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    /// Zero-based page number
    pub number: usize,
    pub frames: Vec<AlignedFrame>,
}

/// Forward-only cursor over fixed-size pages
pub struct PageCursor<'a> {
    frames: RangeIter<'a>,
    page_size: usize,
    number: usize,
}

impl Iterator for PageCursor<'_> {
    type Item = Page;

    fn next(&mut self) -> Option<Self::Item> {
        let frames: Vec<AlignedFrame> = self.frames.by_ref().take(self.page_size).collect();
        if frames.is_empty() {
            return None;
        }
        let page = Page {
            number: self.number,
            frames,
        };
        self.number += 1;
        Some(page)
    }
}

/// Running min/max/mean of one numeric field
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldStats {
    pub count: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    #[serde(skip)]
    sum: f64,
}

impl FieldStats {
    fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    fn finish(&mut self) {
        self.mean = (self.count > 0).then(|| self.sum / self.count as f64);
    }
}

/// Aggregates for one stream over a range
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamSummary {
    pub real: usize,
    pub interpolated: usize,
    pub forward_filled: usize,
    pub missing: usize,
    /// Share of frames with a non-missing cell, in percent
    pub completeness: f64,
    pub fields: BTreeMap<String, FieldStats>,
}

impl StreamSummary {
    fn observe(&mut self, cell: &Cell) {
        match cell.provenance {
            Provenance::Real => self.real += 1,
            Provenance::Interpolated => self.interpolated += 1,
            Provenance::ForwardFilled => self.forward_filled += 1,
            Provenance::Missing => self.missing += 1,
        }

        // Error readings stay visible on the timeline but do not skew stats
        if matches!(cell.quality, Some(Quality::SensorError | Quality::OutOfRange)) {
            return;
        }

        for (name, field) in &cell.fields {
            if let FieldValue::Number(value) = field.value {
                self.fields.entry(name.clone()).or_default().push(value);
            }
        }
    }

    fn finish(&mut self, frame_count: usize) {
        let present = self.real + self.interpolated + self.forward_filled;
        self.completeness = if frame_count == 0 {
            0.0
        } else {
            present as f64 * 100.0 / frame_count as f64
        };
        for stats in self.fields.values_mut() {
            stats.finish();
        }
    }
}

/// Result of `TimelineIndex::summarize`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeSummary {
    pub from: Instant,
    pub to: Instant,
    pub frame_count: usize,
    pub streams: BTreeMap<StreamKind, StreamSummary>,
}
