//! Sync CLI - Command-line interface for Synheart Sync
//!
//! Commands:
//! - align: Align a patient directory into one timeline
//! - gaps: List stream outages without aligning
//! - validate: Check every record of every stream file
//! - summary: Per-stream statistics over a time range
//! - config: Print the effective alignment configuration

use chrono::DateTime;
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Serialize, Serializer};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use synheart_sync::error::RecordError;
use synheart_sync::pipeline::{SessionProcessor, StreamReport};
use synheart_sync::source::discover;
use synheart_sync::{
    AlignedFrame, AlignmentStrategy, CancelToken, Gap, Instant, RangeQuery, StreamKind, SyncConfig, SyncError,
    PRODUCER_NAME, SYNC_VERSION,
};

/// Frames resolved per write batch by `align`
const OUTPUT_PAGE_SIZE: usize = 1_000;

/// Sync - Align unsynchronized biomedical sensor streams
#[derive(Parser)]
#[command(name = "sync-cli")]
#[command(author = "Synheart AI Inc")]
#[command(version = SYNC_VERSION)]
#[command(about = "Align per-stream sensor files into one patient timeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Align a patient directory into one timeline
    Align {
        /// Patient directory holding <stream>.csv / <stream>.json files
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        #[command(flatten)]
        alignment: AlignmentArgs,

        #[command(flatten)]
        range: RangeArgs,
    },

    /// List gaps per stream
    Gaps {
        /// Patient directory
        #[arg(short, long)]
        input: PathBuf,

        /// Output format (defaults to pretty JSON on a terminal)
        #[arg(long)]
        output_format: Option<OutputFormat>,

        #[command(flatten)]
        alignment: AlignmentArgs,
    },

    /// Check every record of every stream file
    Validate {
        /// Patient directory
        #[arg(short, long)]
        input: PathBuf,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Per-stream statistics over a time range
    Summary {
        /// Patient directory
        #[arg(short, long)]
        input: PathBuf,

        /// Output format (defaults to pretty JSON on a terminal)
        #[arg(long)]
        output_format: Option<OutputFormat>,

        #[command(flatten)]
        alignment: AlignmentArgs,

        #[command(flatten)]
        range: RangeArgs,
    },

    /// Print the effective alignment configuration
    Config {
        #[command(flatten)]
        alignment: AlignmentArgs,
    },
}

#[derive(clap::Args)]
struct AlignmentArgs {
    /// Load alignment settings from a JSON file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Axis strategy (overrides the config file)
    #[arg(long)]
    strategy: Option<StrategyArg>,

    /// Anchor stream for the anchor strategy
    #[arg(long)]
    anchor: Option<String>,

    /// Grid spacing in milliseconds for the fixed-grid strategy
    #[arg(long)]
    grid_interval_ms: Option<i64>,

    /// Maximum distance to a neighbour used for filling, in milliseconds
    #[arg(long)]
    max_fill_window_ms: Option<i64>,
}

#[derive(clap::Args)]
struct RangeArgs {
    /// Range start (RFC 3339 or epoch milliseconds)
    #[arg(long)]
    from: Option<String>,

    /// Range end, inclusive (RFC 3339 or epoch milliseconds)
    #[arg(long)]
    to: Option<String>,

    /// Restrict output to these streams
    #[arg(long, value_delimiter = ',')]
    streams: Vec<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    /// Every distinct sample instant
    Union,
    /// Uniform grid
    Grid,
    /// Instants of one anchor stream
    Anchor,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string()));
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), SyncCliError> {
    match cli.command {
        Commands::Align {
            input,
            output,
            output_format,
            alignment,
            range,
        } => cmd_align(&input, &output, output_format, &alignment, &range),

        Commands::Gaps {
            input,
            output_format,
            alignment,
        } => cmd_gaps(&input, output_format, &alignment),

        Commands::Validate { input, json } => cmd_validate(&input, json),

        Commands::Summary {
            input,
            output_format,
            alignment,
            range,
        } => cmd_summary(&input, output_format, &alignment, &range),

        Commands::Config { alignment } => cmd_config(&alignment),
    }
}

fn cmd_align(
    input: &Path,
    output: &Path,
    output_format: OutputFormat,
    alignment: &AlignmentArgs,
    range: &RangeArgs,
) -> Result<(), SyncCliError> {
    let config = load_config(alignment)?;
    let query = build_query(range)?;

    let sources = discover(input)?;
    let timeline = SessionProcessor::new(config)?.process(&sources, &CancelToken::new())?;

    let writer: Box<dyn Write> = if output.to_string_lossy() == "-" {
        Box::new(io::stdout().lock())
    } else {
        Box::new(File::create(output)?)
    };
    let mut writer = BufWriter::new(writer);

    // Frames are resolved one page at a time and written as they come
    let frames = timeline
        .index
        .pages(&query, OUTPUT_PAGE_SIZE)
        .flat_map(|page| page.frames);
    write_frames(&mut writer, frames, output_format)?;
    writer.flush()?;

    Ok(())
}

fn cmd_gaps(input: &Path, output_format: Option<OutputFormat>, alignment: &AlignmentArgs) -> Result<(), SyncCliError> {
    let config = load_config(alignment)?;
    let sources = discover(input)?;
    let reports = SessionProcessor::new(config.clone())?.ingest_all(&sources)?;

    let mut gaps: Vec<Gap> = reports
        .into_iter()
        .flat_map(|report| {
            let (series, _) = report.into_series(config.gap_threshold_multiplier);
            series.gaps().to_vec()
        })
        .collect();
    gaps.sort_by_key(|gap| (gap.start, gap.stream));

    print!("{}", format_output(&gaps, terminal_default(output_format))?);
    Ok(())
}

fn cmd_validate(input: &Path, json: bool) -> Result<(), SyncCliError> {
    let sources = discover(input)?;
    let reports = SessionProcessor::new(SyncConfig::default())?.ingest_all(&sources)?;

    let report = ValidationReport {
        streams: reports
            .iter()
            .map(|r| StreamValidation {
                stream: r.stream,
                total_records: r.raw_count,
                valid_records: r.samples.len(),
                invalid_records: r.errors.len(),
                errors: r.errors.iter().map(ValidationErrorDetail::from).collect(),
            })
            .collect(),
    };
    let invalid: usize = report.streams.iter().map(|s| s.invalid_records).sum();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        for stream in &report.streams {
            println!(
                "{:<18} total {:>7}  valid {:>7}  invalid {:>5}",
                stream.stream.as_str(),
                stream.total_records,
                stream.valid_records,
                stream.invalid_records
            );
        }

        if invalid > 0 {
            println!("\nErrors:");
            for stream in &report.streams {
                for err in &stream.errors {
                    println!("  - {} record {}: {}", stream.stream, err.index, err.error);
                }
            }
        }
    }

    if invalid > 0 {
        Err(SyncCliError::ValidationFailed(invalid))
    } else {
        Ok(())
    }
}

fn cmd_summary(
    input: &Path,
    output_format: Option<OutputFormat>,
    alignment: &AlignmentArgs,
    range: &RangeArgs,
) -> Result<(), SyncCliError> {
    let config = load_config(alignment)?;
    let query = build_query(range)?;

    let sources = discover(input)?;
    let timeline = SessionProcessor::new(config)?.process(&sources, &CancelToken::new())?;

    let report = SummaryReport {
        producer: PRODUCER_NAME,
        version: SYNC_VERSION,
        job_id: timeline.job_id.to_string(),
        rejected_records: timeline.error_count(),
        streams: timeline.stream_reports(),
        range: timeline.index.summarize(&query),
    };

    let rendered = match terminal_default(output_format) {
        OutputFormat::JsonPretty => serde_json::to_string_pretty(&report)?,
        OutputFormat::Json | OutputFormat::Ndjson => serde_json::to_string(&report)?,
    };
    println!("{}", rendered);
    Ok(())
}

fn cmd_config(alignment: &AlignmentArgs) -> Result<(), SyncCliError> {
    let config = load_config(alignment)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

// Helper functions

fn load_config(args: &AlignmentArgs) -> Result<SyncConfig, SyncCliError> {
    let mut config = match &args.config {
        Some(path) => SyncConfig::from_json_file(path)?,
        None => SyncConfig::default(),
    };

    if let Some(strategy) = args.strategy {
        config.strategy = match strategy {
            StrategyArg::Union => AlignmentStrategy::UnionAxis,
            StrategyArg::Grid => AlignmentStrategy::FixedGrid,
            StrategyArg::Anchor => AlignmentStrategy::AnchorStream,
        };
    }
    if let Some(anchor) = &args.anchor {
        config.anchor_stream = Some(anchor.parse()?);
    }
    if let Some(interval) = args.grid_interval_ms {
        config.grid_interval_ms = interval;
    }
    if let Some(window) = args.max_fill_window_ms {
        config.max_fill_window_ms = window;
    }

    config.validate().map_err(SyncError::from)?;
    Ok(config)
}

fn build_query(args: &RangeArgs) -> Result<RangeQuery, SyncCliError> {
    let all = RangeQuery::all();
    let from = args.from.as_deref().map(parse_instant).transpose()?.unwrap_or(all.from);
    let to = args.to.as_deref().map(parse_instant).transpose()?.unwrap_or(all.to);

    let query = RangeQuery::between(from, to);
    if args.streams.is_empty() {
        return Ok(query);
    }
    let streams = args
        .streams
        .iter()
        .map(|s| s.parse::<StreamKind>())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(query.with_streams(streams))
}

fn parse_instant(text: &str) -> Result<Instant, SyncCliError> {
    if let Ok(millis) = text.trim().parse::<i64>() {
        return Ok(Instant::from_millis(millis));
    }
    DateTime::parse_from_rfc3339(text.trim())
        .map(|dt| Instant::from_millis(dt.timestamp_millis()))
        .map_err(|e| SyncCliError::InvalidArgument(format!("invalid instant {text:?}: {e}")))
}

/// Pretty JSON for a human at a terminal, NDJSON for pipes
fn terminal_default(format: Option<OutputFormat>) -> OutputFormat {
    format.unwrap_or_else(|| {
        if atty::is(atty::Stream::Stdout) {
            OutputFormat::JsonPretty
        } else {
            OutputFormat::Ndjson
        }
    })
}

fn write_frames<W, I>(writer: &mut W, frames: I, format: OutputFormat) -> Result<(), SyncCliError>
where
    W: Write,
    I: Iterator<Item = AlignedFrame>,
{
    match format {
        OutputFormat::Ndjson => {
            for frame in frames {
                serde_json::to_writer(&mut *writer, &frame)?;
                writer.write_all(b"\n")?;
            }
        }
        OutputFormat::Json => serde_json::Serializer::new(&mut *writer).collect_seq(frames)?,
        OutputFormat::JsonPretty => serde_json::Serializer::pretty(&mut *writer).collect_seq(frames)?,
    }
    if !matches!(format, OutputFormat::Ndjson) {
        writer.write_all(b"\n")?;
    }
    Ok(())
}

fn format_output<T: Serialize>(records: &[T], format: OutputFormat) -> Result<String, SyncCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut out = String::new();
            for record in records {
                out.push_str(&serde_json::to_string(record)?);
                out.push('\n');
            }
            Ok(out)
        }
        OutputFormat::Json => Ok(serde_json::to_string(records)? + "\n"),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(records)? + "\n"),
    }
}

// Error types

#[derive(Debug)]
enum SyncCliError {
    Io(io::Error),
    Sync(SyncError),
    Json(serde_json::Error),
    InvalidArgument(String),
    ValidationFailed(usize),
}

impl From<io::Error> for SyncCliError {
    fn from(e: io::Error) -> Self {
        SyncCliError::Io(e)
    }
}

impl From<SyncError> for SyncCliError {
    fn from(e: SyncError) -> Self {
        SyncCliError::Sync(e)
    }
}

impl From<synheart_sync::AlignmentError> for SyncCliError {
    fn from(e: synheart_sync::AlignmentError) -> Self {
        SyncCliError::Sync(e.into())
    }
}

impl From<serde_json::Error> for SyncCliError {
    fn from(e: serde_json::Error) -> Self {
        SyncCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<SyncCliError> for CliError {
    fn from(e: SyncCliError) -> Self {
        match e {
            SyncCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            SyncCliError::Sync(e) => {
                let (code, hint) = match &e {
                    SyncError::Io(_) => ("IO_ERROR", "Check file paths and permissions"),
                    SyncError::Json(_) | SyncError::Csv(_) => ("PARSE_ERROR", "Check the stream file syntax"),
                    SyncError::Alignment(_) => ("ALIGNMENT_ERROR", "Run 'sync-cli config' to inspect settings"),
                    SyncError::UnknownStream(_) => (
                        "UNKNOWN_STREAM",
                        "Known streams: heart_rate, movement, blood_oxygen, skin_temperature, load",
                    ),
                    SyncError::DuplicateStream(_) => ("DUPLICATE_STREAM", "Keep one file per stream"),
                    SyncError::UnsupportedFile(_) => ("UNSUPPORTED_FILE", "Use .csv, .json, .ndjson or .jsonl"),
                    SyncError::NoStreamFiles(_) => (
                        "NO_STREAMS",
                        "Name files after their stream, e.g. heart_rate.csv",
                    ),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            SyncCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            SyncCliError::InvalidArgument(msg) => CliError {
                code: "INVALID_ARGUMENT".to_string(),
                message: msg,
                hint: Some("Run with --help for usage".to_string()),
            },
            SyncCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} records failed validation", count),
                hint: Some("Fix the listed records and retry".to_string()),
            },
        }
    }
}

// Report types

#[derive(Serialize)]
struct ValidationReport {
    streams: Vec<StreamValidation>,
}

#[derive(Serialize)]
struct StreamValidation {
    stream: StreamKind,
    total_records: usize,
    valid_records: usize,
    invalid_records: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(Serialize)]
struct ValidationErrorDetail {
    index: usize,
    kind: &'static str,
    error: String,
}

impl From<&RecordError> for ValidationErrorDetail {
    fn from(e: &RecordError) -> Self {
        ValidationErrorDetail {
            index: e.index(),
            kind: match e {
                RecordError::Format(_) => "format",
                RecordError::Validation(_) => "validation",
                RecordError::Malformed(_) => "malformed",
            },
            error: e.to_string(),
        }
    }
}

#[derive(Serialize)]
struct SummaryReport {
    producer: &'static str,
    version: &'static str,
    job_id: String,
    rejected_records: usize,
    streams: Vec<StreamReport>,
    range: synheart_sync::query::RangeSummary,
}
