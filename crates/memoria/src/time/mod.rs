//! Time utilities: parsing, expiration resolution and clocks
//!
//! [`resolve_text`] and [`resolve_number`] turn raw expiration inputs into a
//! [`ResolvedSpec`]. Numbers above [`TIMESTAMP_THRESHOLD`] are unix
//! timestamps, smaller ones are refresh intervals in seconds. Strings are
//! tried as a datetime, a date (midnight UTC), a time of day (today) and
//! finally as a duration.

pub mod clock;
pub mod datetime;
pub mod duration;

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use clock::{Clock, MockClock, SystemClock};
pub use datetime::{from_unix_seconds, parse_date, parse_datetime, parse_time, TimeOfDay};
pub use duration::parse_duration;

/// Numbers strictly greater than this are read as unix timestamps.
pub const TIMESTAMP_THRESHOLD: f64 = 1e8;

/// Error type for time expression parsing
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Input was empty or whitespace
    #[error("Empty time expression")]
    Empty,

    /// Input looked like a duration but could not be read
    #[error("Invalid duration: '{0}'")]
    InvalidDuration(String),

    /// Input is not a valid datetime
    #[error("Invalid datetime: '{0}'")]
    InvalidDateTime(String),

    /// Input is not a valid calendar date
    #[error("Invalid date: '{0}'")]
    InvalidDate(String),

    /// Input is not a valid time of day
    #[error("Invalid time: '{0}'")]
    InvalidTime(String),

    /// A duration term used an unknown unit
    #[error("Unknown unit '{unit}' in '{input}'")]
    UnknownUnit { input: String, unit: String },

    /// Value cannot be represented as a duration or instant
    #[error("Value out of range: '{0}'")]
    OutOfRange(String),

    /// Input matched none of the accepted shapes
    #[error("Unrecognised time expression: '{0}'")]
    Unrecognised(String),
}

/// A raw expiration input reduced to one of four shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedSpec {
    /// The entry never expires
    Never,
    /// The entry is expired already
    AlreadyExpired,
    /// The entry expires at a fixed instant
    AtInstant(DateTime<Utc>),
    /// The entry expires a fixed interval after it was computed
    EveryInterval(Duration),
}

impl From<bool> for ResolvedSpec {
    fn from(expired: bool) -> Self {
        if expired {
            Self::AlreadyExpired
        } else {
            Self::Never
        }
    }
}

/// Resolve a numeric expiration
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use memoria::time::{resolve_number, ResolvedSpec};
///
/// assert_eq!(resolve_number(30.0).unwrap(), ResolvedSpec::EveryInterval(Duration::from_secs(30)));
/// assert!(matches!(resolve_number(2_000_000_000.0).unwrap(), ResolvedSpec::AtInstant(_)));
/// ```
///
/// # Errors
///
/// Returns [`ParseError::OutOfRange`] for `NaN`, infinities and negative values.
pub fn resolve_number(value: f64) -> Result<ResolvedSpec, ParseError> {
    if !value.is_finite() {
        return Err(ParseError::OutOfRange(value.to_string()));
    }
    if value.trunc() > TIMESTAMP_THRESHOLD {
        return from_unix_seconds(value).map(ResolvedSpec::AtInstant);
    }
    Duration::try_from_secs_f64(value)
        .map(ResolvedSpec::EveryInterval)
        .map_err(|_| ParseError::OutOfRange(value.to_string()))
}

/// Resolve a textual expiration relative to `now`
///
/// Pointer strings (`$.path`) are not handled here; the expiration
/// evaluator recognises them before delegating.
///
/// # Errors
///
/// Returns a [`ParseError`] when the text is none of the accepted number,
/// date, time or duration forms.
pub fn resolve_text(input: &str, now: DateTime<Utc>) -> Result<ResolvedSpec, ParseError> {
    let text = input.trim();
    if text.is_empty() {
        return Err(ParseError::Empty);
    }

    if let Ok(number) = text.parse::<f64>() {
        return resolve_number(number);
    }
    if let Ok(at) = parse_datetime(text) {
        return Ok(ResolvedSpec::AtInstant(at));
    }
    if let Ok(date) = parse_date(text) {
        return Ok(ResolvedSpec::AtInstant(date.and_time(chrono::NaiveTime::MIN).and_utc()));
    }
    if let Ok(time) = parse_time(text) {
        return time.on_day_of(now).map(ResolvedSpec::AtInstant);
    }
    match parse_duration(text) {
        Ok(interval) => Ok(ResolvedSpec::EveryInterval(interval)),
        Err(err @ ParseError::UnknownUnit { .. }) => Err(err),
        Err(_) => Err(ParseError::Unrecognised(text.to_string())),
    }
}
