//! Pipeline orchestration
//!
//! This module provides the public API for Synheart Sync.
//! It takes raw per-stream records through adaptation, gap detection and
//! alignment, and hands back a queryable patient timeline.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::thread;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapters::{standard_adapter, AdapterRegistry, StreamAdapter};
use crate::aligner::{Aligner, CancelToken};
use crate::config::SyncConfig;
use crate::error::{AlignmentError, MalformedError, RecordError, SyncError};
use crate::query::{RangeIter, TimelineIndex};
use crate::series::{sort_samples, StreamSeries};
use crate::source::{discover, RecordSource, SourceEntry};
use crate::types::{AlignedFrame, Gap, Instant, NormalizedSample, Quality, RawRecord, StreamKind, StreamProfile};

pub use crate::gaps::detect_gaps;

/// Outcome of ingesting one stream's raw records.
///
/// Every raw record ends up either in `samples` or in `errors`.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub stream: StreamKind,
    pub profile: StreamProfile,
    pub raw_count: usize,
    /// Parsed samples, sorted by instant
    pub samples: Vec<NormalizedSample>,
    pub errors: Vec<RecordError>,
}

impl IngestReport {
    /// Whether every raw record is accounted for
    pub fn is_lossless(&self) -> bool {
        self.samples.len() + self.errors.len() == self.raw_count
    }

    pub fn quality_counts(&self) -> BTreeMap<Quality, usize> {
        quality_counts(&self.samples)
    }

    /// Turn the parsed samples into a gap-annotated series
    pub fn into_series(self, gap_multiplier: f64) -> (StreamSeries, Vec<RecordError>) {
        (StreamSeries::new(self.profile, self.samples, gap_multiplier), self.errors)
    }
}

/// Incremental ingest of one stream, record by record
pub struct StreamIngestor<'a> {
    adapter: &'a dyn StreamAdapter,
    raw_count: usize,
    samples: Vec<NormalizedSample>,
    errors: Vec<RecordError>,
}

impl<'a> StreamIngestor<'a> {
    pub fn new(adapter: &'a dyn StreamAdapter) -> Self {
        Self {
            adapter,
            raw_count: 0,
            samples: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Parse one record; failures are kept, not raised
    pub fn push(&mut self, record: RawRecord) {
        let index = self.raw_count;
        self.raw_count += 1;

        match self.adapter.parse(index, &record) {
            Ok(sample) => self.samples.push(sample),
            Err(e) => self.reject(e),
        }
    }

    /// Account for an entry the source could not decode
    pub fn push_malformed(&mut self, reason: String) {
        let index = self.raw_count;
        self.raw_count += 1;
        self.reject(
            MalformedError {
                stream: self.adapter.kind(),
                index,
                reason,
            }
            .into(),
        );
    }

    pub fn push_entry(&mut self, entry: SourceEntry) {
        match entry {
            SourceEntry::Record(record) => self.push(record),
            SourceEntry::Malformed(reason) => self.push_malformed(reason),
        }
    }

    fn reject(&mut self, error: RecordError) {
        debug!(stream = %self.adapter.kind(), index = error.index(), error = %error, "rejected record");
        self.errors.push(error);
    }

    pub fn finish(mut self) -> IngestReport {
        let stream = self.adapter.kind();
        sort_samples(&mut self.samples);

        if !self.errors.is_empty() {
            warn!(
                stream = %stream,
                rejected = self.errors.len(),
                total = self.raw_count,
                "records rejected during ingest"
            );
        }
        debug!(
            stream = %stream,
            samples = self.samples.len(),
            total = self.raw_count,
            "stream ingested"
        );

        IngestReport {
            stream,
            profile: self.adapter.profile(),
            raw_count: self.raw_count,
            samples: self.samples,
            errors: self.errors,
        }
    }
}

/// Parse raw records of one stream with its built-in adapter.
///
/// # Arguments
/// * `stream` - Stream the records belong to
/// * `records` - Raw records in source order
///
/// # Returns
/// Sorted samples plus one error per rejected record
///
/// # Example
/// ```ignore
/// let report = ingest(StreamKind::HeartRate, records);
/// assert!(report.is_lossless());
/// ```
pub fn ingest(stream: StreamKind, records: impl IntoIterator<Item = RawRecord>) -> IngestReport {
    let mut ingestor = StreamIngestor::new(standard_adapter(stream));
    for record in records {
        ingestor.push(record);
    }
    ingestor.finish()
}

/// Align stream series onto one canonical axis.
///
/// # Arguments
/// * `streams` - One series per stream; streams may be empty
/// * `config` - Axis strategy, fill policies and windows
///
/// # Returns
/// Frames in strictly increasing instant order, one cell per supplied stream
pub fn align(
    streams: &BTreeMap<StreamKind, StreamSeries>,
    config: &SyncConfig,
) -> Result<Vec<AlignedFrame>, AlignmentError> {
    Aligner::new(config.clone())?.align(streams)
}

/// Load every stream file found in a patient directory and align it.
///
/// Files are discovered by stream name (`heart_rate.csv`, `movement.json`, ...).
pub fn align_patient_dir(dir: &Path, config: SyncConfig) -> Result<SessionTimeline, SyncError> {
    let sources = discover(dir)?;
    SessionProcessor::new(config)?.process(&sources, &CancelToken::new())
}

/// Per-stream ingest statistics of a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamReport {
    pub stream: StreamKind,
    pub raw_records: usize,
    pub samples: usize,
    pub rejected: usize,
    pub gaps: usize,
    pub quality: BTreeMap<Quality, usize>,
    pub first: Option<Instant>,
    pub last: Option<Instant>,
}

/// Result of processing one patient session.
///
/// Frames are resolved on demand through `index`.
#[derive(Debug)]
pub struct SessionTimeline {
    pub job_id: Uuid,
    pub errors: BTreeMap<StreamKind, Vec<RecordError>>,
    pub raw_counts: BTreeMap<StreamKind, usize>,
    pub index: TimelineIndex,
}

impl SessionTimeline {
    /// Every frame, resolved lazily in instant order
    pub fn frames(&self) -> RangeIter<'_> {
        self.index.frames()
    }

    pub fn streams(&self) -> &BTreeMap<StreamKind, StreamSeries> {
        self.index.streams()
    }

    /// Gaps of every stream, ordered by start
    pub fn gaps(&self) -> Vec<&Gap> {
        let mut gaps: Vec<&Gap> = self.streams().values().flat_map(|s| s.gaps()).collect();
        gaps.sort_by_key(|gap| (gap.start, gap.stream));
        gaps
    }

    pub fn error_count(&self) -> usize {
        self.errors.values().map(Vec::len).sum()
    }

    /// Whether every raw record became a sample or an error
    pub fn is_lossless(&self) -> bool {
        self.raw_counts.iter().all(|(kind, raw)| {
            let samples = self.streams().get(kind).map_or(0, StreamSeries::len);
            let errors = self.errors.get(kind).map_or(0, Vec::len);
            samples + errors == *raw
        })
    }

    pub fn stream_reports(&self) -> Vec<StreamReport> {
        self.streams()
            .iter()
            .map(|(kind, series)| StreamReport {
                stream: *kind,
                raw_records: self.raw_counts.get(kind).copied().unwrap_or_default(),
                samples: series.len(),
                rejected: self.errors.get(kind).map_or(0, Vec::len),
                gaps: series.gaps().len(),
                quality: quality_counts(series.samples()),
                first: series.first_instant(),
                last: series.last_instant(),
            })
            .collect()
    }
}

/// Stateful processor that ingests streams concurrently and aligns them.
///
/// Each stream is read and parsed on its own thread; results fan in over a
/// channel and alignment starts only after every stream has reported.
pub struct SessionProcessor {
    registry: AdapterRegistry,
    config: SyncConfig,
}

impl SessionProcessor {
    /// Create a processor with the built-in adapters
    pub fn new(config: SyncConfig) -> Result<Self, AlignmentError> {
        Self::with_registry(AdapterRegistry::standard(), config)
    }

    /// Create a processor with a custom adapter set
    pub fn with_registry(registry: AdapterRegistry, config: SyncConfig) -> Result<Self, AlignmentError> {
        config.validate()?;
        Ok(Self { registry, config })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Ingest every source concurrently, without aligning
    pub fn ingest_all<S: RecordSource>(&self, sources: &[S]) -> Result<Vec<IngestReport>, SyncError> {
        let mut seen = BTreeSet::new();
        let mut jobs = Vec::with_capacity(sources.len());
        for source in sources {
            let kind = source.kind();
            if !seen.insert(kind) {
                return Err(SyncError::DuplicateStream(kind));
            }
            let adapter = self
                .registry
                .get(kind)
                .ok_or_else(|| SyncError::UnknownStream(kind.to_string()))?;
            jobs.push((source, adapter));
        }

        let mut outcomes: Vec<(StreamKind, Result<IngestReport, SyncError>)> = thread::scope(|scope| {
            let (tx, rx) = crossbeam_channel::bounded(jobs.len().max(1));
            for (source, adapter) in jobs {
                let tx = tx.clone();
                scope.spawn(move || {
                    let result = ingest_source(adapter, source);
                    // The receiver outlives every sender inside the scope
                    let _ = tx.send((source.kind(), result));
                });
            }
            drop(tx);
            rx.iter().collect()
        });

        outcomes.sort_by_key(|(kind, _)| *kind);
        outcomes.into_iter().map(|(_, result)| result).collect()
    }

    /// Ingest, detect gaps and align one session.
    ///
    /// Per-record failures are reported in the timeline; I/O, configuration
    /// and cancellation abort the whole request.
    pub fn process<S: RecordSource>(&self, sources: &[S], cancel: &CancelToken) -> Result<SessionTimeline, SyncError> {
        let job_id = Uuid::new_v4();
        info!(job_id = %job_id, streams = sources.len(), "session ingest started");

        let reports = self.ingest_all(sources)?;
        if cancel.is_cancelled() {
            return Err(AlignmentError::Cancelled.into());
        }

        let mut streams = BTreeMap::new();
        let mut errors = BTreeMap::new();
        let mut raw_counts = BTreeMap::new();
        for report in reports {
            let stream = report.stream;
            raw_counts.insert(stream, report.raw_count);
            let (series, rejected) = report.into_series(self.config.gap_threshold_multiplier);
            streams.insert(stream, series);
            errors.insert(stream, rejected);
        }

        info!(job_id = %job_id, strategy = ?self.config.strategy, "alignment started");
        let index = TimelineIndex::build(Aligner::new(self.config.clone())?, streams, cancel)?;
        info!(job_id = %job_id, frames = index.len(), "timeline indexed");

        Ok(SessionTimeline {
            job_id,
            errors,
            raw_counts,
            index,
        })
    }
}

fn ingest_source(adapter: &dyn StreamAdapter, source: &dyn RecordSource) -> Result<IngestReport, SyncError> {
    let mut ingestor = StreamIngestor::new(adapter);
    source.read_records(&mut |entry| ingestor.push_entry(entry))?;
    Ok(ingestor.finish())
}

fn quality_counts(samples: &[NormalizedSample]) -> BTreeMap<Quality, usize> {
    let mut counts = BTreeMap::new();
    for sample in samples {
        *counts.entry(sample.quality).or_insert(0) += 1;
    }
    counts
}
