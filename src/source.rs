//! Stream sources
//!
//! A source yields one stream's raw records, one at a time, without holding
//! the whole file in memory. File sources reopen their file on every call, so
//! a pass can be repeated.
//!
//! A CSV row or NDJSON line that cannot be decoded is handed on as a
//! `SourceEntry::Malformed` so the rest of the file still ingests. Only I/O
//! failures, an unreadable CSV header and broken JSON array syntax abort the
//! file.
//!
//! Supported layouts:
//! - CSV with a header row
//! - A JSON array of objects
//! - Newline-delimited JSON objects (`.ndjson` / `.jsonl`, or `.json` that
//!   does not start with `[`)

use serde::de::{DeserializeSeed, Deserializer, SeqAccess, Visitor};
use serde_json::{Map, Number, Value};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::SyncError;
use crate::types::{RawRecord, StreamKind};

/// File extensions `discover` tries, in order of preference
const STREAM_EXTENSIONS: [&str; 4] = ["csv", "json", "ndjson", "jsonl"];

/// One entry of a stream, in source order
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEntry {
    Record(RawRecord),
    /// A row or line that could not be decoded, with the reason
    Malformed(String),
}

/// Something that can replay one stream's raw records
pub trait RecordSource: Send + Sync {
    fn kind(&self) -> StreamKind;

    /// Hand every entry to `sink` in source order
    fn read_records(&self, sink: &mut dyn FnMut(SourceEntry)) -> Result<(), SyncError>;
}

impl<T: RecordSource + ?Sized> RecordSource for Box<T> {
    fn kind(&self) -> StreamKind {
        (**self).kind()
    }

    fn read_records(&self, sink: &mut dyn FnMut(SourceEntry)) -> Result<(), SyncError> {
        (**self).read_records(sink)
    }
}

/// On-disk layout of a stream file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    JsonArray,
    Ndjson,
}

/// A stream backed by a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSource {
    kind: StreamKind,
    path: PathBuf,
    format: FileFormat,
}

impl StreamSource {
    /// Open a stream file, detecting its layout from the extension and, for
    /// `.json`, the first non-whitespace byte
    pub fn new(kind: StreamKind, path: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let path = path.into();
        let format = detect_format(&path)?;
        Ok(Self { kind, path, format })
    }

    pub fn with_format(kind: StreamKind, path: impl Into<PathBuf>, format: FileFormat) -> Self {
        Self {
            kind,
            path: path.into(),
            format,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }
}

impl RecordSource for StreamSource {
    fn kind(&self) -> StreamKind {
        self.kind
    }

    fn read_records(&self, sink: &mut dyn FnMut(SourceEntry)) -> Result<(), SyncError> {
        debug!(stream = %self.kind, path = %self.path.display(), format = ?self.format, "reading stream file");
        let reader = BufReader::new(File::open(&self.path)?);
        match self.format {
            FileFormat::Csv => read_csv(self.kind, reader, sink),
            FileFormat::JsonArray => read_json_array(self.kind, reader, sink),
            FileFormat::Ndjson => read_ndjson(self.kind, reader, sink),
        }
    }
}

/// Records held in memory, mainly for tests and embedding
#[derive(Debug, Clone, PartialEq)]
pub struct MemorySource {
    kind: StreamKind,
    records: Vec<RawRecord>,
}

impl MemorySource {
    pub fn new(kind: StreamKind, records: Vec<RawRecord>) -> Self {
        Self { kind, records }
    }

    /// Build from JSON values; each becomes one record of `kind`
    pub fn from_values(kind: StreamKind, values: impl IntoIterator<Item = Value>) -> Self {
        let records = values
            .into_iter()
            .map(|value| RawRecord::from_value(kind, value))
            .collect();
        Self { kind, records }
    }
}

impl RecordSource for MemorySource {
    fn kind(&self) -> StreamKind {
        self.kind
    }

    fn read_records(&self, sink: &mut dyn FnMut(SourceEntry)) -> Result<(), SyncError> {
        for record in &self.records {
            sink(SourceEntry::Record(record.clone()));
        }
        Ok(())
    }
}

/// Find `<stream>.<ext>` files for every known stream in `dir`
pub fn discover(dir: &Path) -> Result<Vec<StreamSource>, SyncError> {
    let mut sources = Vec::new();
    for kind in StreamKind::ALL {
        let found = STREAM_EXTENSIONS
            .iter()
            .map(|ext| dir.join(format!("{}.{}", kind.as_str(), ext)))
            .find(|path| path.is_file());
        if let Some(path) = found {
            sources.push(StreamSource::new(kind, path)?);
        }
    }

    if sources.is_empty() {
        return Err(SyncError::NoStreamFiles(dir.display().to_string()));
    }
    Ok(sources)
}

fn detect_format(path: &Path) -> Result<FileFormat, SyncError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("csv") => Ok(FileFormat::Csv),
        Some("ndjson") | Some("jsonl") => Ok(FileFormat::Ndjson),
        Some("json") => {
            let mut reader = BufReader::new(File::open(path)?);
            match first_significant_byte(&mut reader)? {
                Some(b'[') | None => Ok(FileFormat::JsonArray),
                Some(_) => Ok(FileFormat::Ndjson),
            }
        }
        _ => Err(SyncError::UnsupportedFile(path.display().to_string())),
    }
}

fn first_significant_byte<R: BufRead>(reader: &mut R) -> Result<Option<u8>, SyncError> {
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            return Ok(None);
        }
        if let Some(pos) = buf.iter().position(|b| !b.is_ascii_whitespace()) {
            return Ok(Some(buf[pos]));
        }
        let consumed = buf.len();
        reader.consume(consumed);
    }
}

fn read_csv<R: Read>(kind: StreamKind, reader: R, sink: &mut dyn FnMut(SourceEntry)) -> Result<(), SyncError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = reader.headers()?.clone();

    for row in reader.byte_records() {
        let row = match row {
            Ok(row) => row,
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                sink(SourceEntry::Malformed(e.to_string()));
                continue;
            }
        };
        sink(decode_csv_row(kind, &headers, &row));
    }
    Ok(())
}

fn decode_csv_row(kind: StreamKind, headers: &csv::StringRecord, row: &csv::ByteRecord) -> SourceEntry {
    let mut fields = Map::new();
    for (name, cell) in headers.iter().zip(row.iter()) {
        match std::str::from_utf8(cell) {
            Ok(cell) => {
                fields.insert(name.to_string(), csv_cell(cell));
            }
            Err(_) => return SourceEntry::Malformed(format!("field `{name}` is not valid UTF-8")),
        }
    }
    SourceEntry::Record(RawRecord::new(kind, fields))
}

/// Give a CSV cell the JSON type it most plausibly has
fn csv_cell(cell: &str) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(v) = cell.parse::<i64>() {
        return Value::Number(v.into());
    }
    if let Some(n) = cell.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(n);
    }
    Value::String(cell.to_string())
}

/// Streams a top-level JSON array into the sink, element by element
struct ArraySink<'s> {
    kind: StreamKind,
    sink: &'s mut dyn FnMut(SourceEntry),
}

impl<'de> Visitor<'de> for ArraySink<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "a JSON array of {} records", self.kind)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<(), A::Error>
    where
        A: SeqAccess<'de>,
    {
        let sink = self.sink;
        while let Some(value) = seq.next_element::<Value>()? {
            sink(SourceEntry::Record(RawRecord::from_value(self.kind, value)));
        }
        Ok(())
    }
}

impl<'de> DeserializeSeed<'de> for ArraySink<'_> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> Result<(), D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(self)
    }
}

fn read_json_array<R: Read>(kind: StreamKind, reader: R, sink: &mut dyn FnMut(SourceEntry)) -> Result<(), SyncError> {
    let mut deserializer = serde_json::Deserializer::from_reader(reader);
    ArraySink { kind, sink }.deserialize(&mut deserializer)?;
    deserializer.end()?;
    Ok(())
}

/// One JSON value per line; blank lines are skipped
fn read_ndjson<R: BufRead>(kind: StreamKind, mut reader: R, sink: &mut dyn FnMut(SourceEntry)) -> Result<(), SyncError> {
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(());
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<Value>(&line) {
            Ok(value) => sink(SourceEntry::Record(RawRecord::from_value(kind, value))),
            Err(e) => sink(SourceEntry::Malformed(e.to_string())),
        }
    }
}
