//! Timestamp normalization
//!
//! Every stream declares how its timestamps are encoded. This module turns
//! those raw values into canonical UTC millisecond instants:
//! - Numeric epochs are read in the unit the stream declares, never guessed
//!   from magnitude
//! - ISO 8601 text must carry an explicit offset, which is applied
//! - The load stream mixes three textual shapes, tried in a fixed order

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::types::{Instant, RawTimestamp};

/// Slash-delimited load timestamps carry no offset and are read as UTC
const SLASH_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Timestamp encoding declared by a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampFormat {
    /// ISO 8601 / RFC 3339 text with `Z` or an explicit `±HH:MM` offset
    Iso8601,
    /// Integer Unix epoch in milliseconds
    UnixMillis,
    /// Integer Unix epoch in seconds
    UnixSeconds,
    /// ISO with fraction, ISO without fraction, or `YYYY/MM/DD HH:MM:SS` (UTC)
    LoadMixed,
}

/// Why a raw timestamp was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimestampError {
    #[error("expected {expected}, got {actual}")]
    WrongType {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("text does not match {0}")]
    Unrecognized(&'static str),

    #[error("instant is outside the representable range")]
    OutOfRange,
}

/// The three textual shapes of load timestamps, in the order they are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadShape {
    IsoFractional,
    IsoWhole,
    Slash,
}

impl LoadShape {
    const ORDER: [LoadShape; 3] = [LoadShape::IsoFractional, LoadShape::IsoWhole, LoadShape::Slash];

    fn parse(self, text: &str) -> Option<DateTime<Utc>> {
        match self {
            LoadShape::IsoFractional if text.contains('.') => parse_rfc3339(text),
            LoadShape::IsoWhole if !text.contains('.') => parse_rfc3339(text),
            LoadShape::Slash => NaiveDateTime::parse_from_str(text, SLASH_FORMAT)
                .ok()
                .map(|naive| naive.and_utc()),
            _ => None,
        }
    }
}

/// Converts raw timestamps into canonical instants
pub struct TimestampNormalizer;

impl TimestampNormalizer {
    /// Normalize a raw timestamp according to the stream's declared format
    pub fn normalize(raw: &RawTimestamp, format: TimestampFormat) -> Result<Instant, TimestampError> {
        match format {
            TimestampFormat::Iso8601 => {
                let text = expect_text(raw)?;
                parse_rfc3339(text)
                    .map(Instant::from_datetime)
                    .ok_or(TimestampError::Unrecognized("ISO 8601 with an explicit offset"))
            }
            TimestampFormat::UnixMillis => {
                let millis = expect_integer(raw)?;
                checked_instant(millis)
            }
            TimestampFormat::UnixSeconds => {
                let seconds = expect_integer(raw)?;
                let millis = seconds
                    .checked_mul(1_000)
                    .ok_or(TimestampError::OutOfRange)?;
                checked_instant(millis)
            }
            TimestampFormat::LoadMixed => {
                let text = expect_text(raw)?;
                LoadShape::ORDER
                    .into_iter()
                    .find_map(|shape| shape.parse(text))
                    .map(Instant::from_datetime)
                    .ok_or(TimestampError::Unrecognized(
                        "ISO 8601 or YYYY/MM/DD HH:MM:SS",
                    ))
            }
        }
    }
}

fn parse_rfc3339(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn checked_instant(millis: i64) -> Result<Instant, TimestampError> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|_| Instant::from_millis(millis))
        .ok_or(TimestampError::OutOfRange)
}

fn expect_text(raw: &RawTimestamp) -> Result<&str, TimestampError> {
    match raw {
        RawTimestamp::Text(text) => Ok(text.trim()),
        RawTimestamp::Integer(_) | RawTimestamp::Float(_) => Err(TimestampError::WrongType {
            expected: "text",
            actual: "a number",
        }),
    }
}

/// Integer epochs may arrive as JSON integers, integral floats, or digit
/// strings (CSV cells). Fractional values are rejected rather than rounded.
fn expect_integer(raw: &RawTimestamp) -> Result<i64, TimestampError> {
    match raw {
        RawTimestamp::Integer(value) => Ok(*value),
        RawTimestamp::Float(value) => {
            if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
                Ok(*value as i64)
            } else {
                Err(TimestampError::WrongType {
                    expected: "an integer epoch",
                    actual: "a fractional number",
                })
            }
        }
        RawTimestamp::Text(text) => text
            .trim()
            .parse::<i64>()
            .map_err(|_| TimestampError::Unrecognized("an integer epoch")),
    }
}
