//! Synheart Sync - Synchronization engine for unsynchronized biomedical sensor streams
//!
//! Sync turns per-stream sensor files with their own timestamp conventions,
//! sampling rates and error markers into one patient timeline through a
//! deterministic pipeline: stream adaptation → timestamp normalization →
//! quality classification → gap detection → alignment → query.
//!
//! ## Modules
//!
//! - **Adapters**: One adapter per sensor stream (heart rate, movement, blood
//!   oxygen, skin temperature, load)
//! - **Aligner**: Union-axis, fixed-grid and anchor-stream alignment with
//!   per-cell provenance
//! - **Query**: Range, paging and summary queries over an aligned timeline

pub mod adapters;
pub mod aligner;
pub mod config;
pub mod error;
pub mod gaps;
pub mod normalizer;
pub mod pipeline;
pub mod quality;
pub mod query;
pub mod series;
pub mod source;
pub mod types;

pub use adapters::{AdapterRegistry, StreamAdapter};
pub use aligner::{Aligner, CancelToken};
pub use config::{AlignmentStrategy, FillPolicy, SyncConfig};
pub use error::{AlignmentError, FormatError, MalformedError, RecordError, SyncError, ValidationError};
pub use pipeline::{align, align_patient_dir, detect_gaps, ingest, IngestReport, SessionProcessor, SessionTimeline};
pub use query::{RangeQuery, TimelineIndex};
pub use series::StreamSeries;
pub use source::{RecordSource, SourceEntry, StreamSource};
pub use types::{AlignedFrame, Cell, Gap, Instant, NormalizedSample, Provenance, Quality, RawRecord, StreamKind};

/// Sync version stamped on CLI output
pub const SYNC_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for CLI output
pub const PRODUCER_NAME: &str = "synheart-sync";
