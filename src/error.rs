//! Error types for Synheart Sync

use thiserror::Error;

use crate::normalizer::TimestampError;
use crate::types::StreamKind;

/// A record whose timestamp could not be normalized
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Unparseable {stream} timestamp {raw:?} in record {index}: {reason}")]
pub struct FormatError {
    pub stream: StreamKind,
    /// Position of the record in its source, zero-based
    pub index: usize,
    pub raw: String,
    pub reason: TimestampError,
}

/// What is wrong with a payload field
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldProblem {
    #[error("is missing")]
    Missing,

    #[error("must be {0}")]
    WrongType(&'static str),
}

/// A record whose payload lacks a required field
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Invalid {stream} record {index}: field `{field}` {problem}")]
pub struct ValidationError {
    pub stream: StreamKind,
    pub index: usize,
    pub field: String,
    pub problem: FieldProblem,
}

/// A row or line of a stream file that could not be decoded into a record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed {stream} record {index}: {reason}")]
pub struct MalformedError {
    pub stream: StreamKind,
    pub index: usize,
    pub reason: String,
}

/// Per-record ingest failure; reported next to the samples that did parse
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Malformed(#[from] MalformedError),
}

impl RecordError {
    pub fn index(&self) -> usize {
        match self {
            RecordError::Format(e) => e.index,
            RecordError::Validation(e) => e.index,
            RecordError::Malformed(e) => e.index,
        }
    }

    pub fn stream(&self) -> StreamKind {
        match self {
            RecordError::Format(e) => e.stream,
            RecordError::Validation(e) => e.stream,
            RecordError::Malformed(e) => e.stream,
        }
    }
}

/// Errors that abort a single alignment request
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AlignmentError {
    #[error("No streams supplied for alignment")]
    NoStreams,

    #[error("Anchor stream {0} was not supplied")]
    UnknownAnchorStream(StreamKind),

    #[error("Invalid sync config: {0}")]
    InvalidConfig(String),

    #[error("Alignment axis would hold {instants} instants, limit is {limit}")]
    AxisTooLarge { instants: u64, limit: u64 },

    #[error("Alignment cancelled")]
    Cancelled,
}

/// Errors that can occur while loading, ingesting or aligning a session
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Alignment(#[from] AlignmentError),

    #[error("Unknown stream: {0}")]
    UnknownStream(String),

    #[error("Stream {0} supplied more than once")]
    DuplicateStream(StreamKind),

    #[error("Unsupported stream file: {0}")]
    UnsupportedFile(String),

    #[error("No stream files found in {0}")]
    NoStreamFiles(String),
}
