//! Datetime, date and time-of-day parsing
//!
//! Parsed values are normalised to UTC. Inputs without an explicit offset
//! are read as UTC.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::ParseError;

const DATE_EXPR: &str = r"(?P<year>\d{4})-(?P<month>\d{1,2})-(?P<day>\d{1,2})";
const TIME_EXPR: &str = r"(?P<hour>\d{1,2}):(?P<minute>\d{1,2})(?::(?P<second>\d{1,2})(?:\.(?P<fraction>\d{1,6})\d{0,6})?)?(?P<offset>Z|[+-]\d{2}(?::?\d{2})?)?";

/// Static date pattern compiled once at first use
#[allow(clippy::expect_used)]
static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("^{DATE_EXPR}$")).expect("DATE_RE pattern is valid and well-formed")
});

#[allow(clippy::expect_used)]
static TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("^{TIME_EXPR}$")).expect("TIME_RE pattern is valid and well-formed")
});

#[allow(clippy::expect_used)]
static DATETIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("^{DATE_EXPR}[T ]{TIME_EXPR}$"))
        .expect("DATETIME_RE pattern is valid and well-formed")
});

/// Numbers above this many seconds are read as milliseconds.
pub const MS_WATERSHED: f64 = 2e10;

/// A wall-clock time with an optional UTC offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay {
    /// Wall-clock time
    pub time: NaiveTime,
    /// Offset from UTC; `None` means UTC
    pub offset: Option<FixedOffset>,
}

impl TimeOfDay {
    /// The instant this time of day falls on for the UTC calendar day of `now`
    ///
    /// # Errors
    ///
    /// Fails when the local time does not map to a single instant.
    pub fn on_day_of(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, ParseError> {
        let naive = now.date_naive().and_time(self.time);
        localize(naive, self.offset)
    }
}

fn number<T: std::str::FromStr>(caps: &Captures<'_>, name: &str) -> Option<T> {
    caps.name(name).and_then(|m| m.as_str().parse().ok())
}

fn date_from(caps: &Captures<'_>) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(number(caps, "year")?, number(caps, "month")?, number(caps, "day")?)
}

fn time_from(caps: &Captures<'_>) -> Option<NaiveTime> {
    let micros = caps
        .name("fraction")
        .map_or(Some(0), |m| format!("{:0<6}", m.as_str()).parse::<u32>().ok())?;
    NaiveTime::from_hms_micro_opt(
        number(caps, "hour")?,
        number(caps, "minute")?,
        number::<u32>(caps, "second").unwrap_or(0),
        micros,
    )
}

fn offset_from(caps: &Captures<'_>) -> Result<Option<FixedOffset>, ()> {
    let Some(raw) = caps.name("offset").map(|m| m.as_str()) else {
        return Ok(None);
    };
    if raw == "Z" {
        return FixedOffset::east_opt(0).map(Some).ok_or(());
    }

    let sign = if raw.starts_with('-') { -1 } else { 1 };
    let digits: String = raw[1..].chars().filter(char::is_ascii_digit).collect();
    let hours: i32 = digits.get(..2).and_then(|h| h.parse().ok()).ok_or(())?;
    let minutes: i32 = digits.get(2..4).map_or(Ok(0), |m| m.parse().map_err(|_| ()))?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).map(Some).ok_or(())
}

fn localize(
    naive: NaiveDateTime,
    offset: Option<FixedOffset>,
) -> Result<DateTime<Utc>, ParseError> {
    match offset {
        None => Ok(Utc.from_utc_datetime(&naive)),
        Some(offset) => offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| ParseError::InvalidDateTime(naive.to_string())),
    }
}

/// Parse `YYYY-MM-DD[T ]HH:MM[:SS[.ffffff]][Z|±HH[:MM]]` into a UTC instant
///
/// # Examples
///
/// ```
/// use memoria::time::parse_datetime;
///
/// let at = parse_datetime("2030-01-02T03:04:05+01:00").unwrap();
/// assert_eq!(at.to_rfc3339(), "2030-01-02T02:04:05+00:00");
/// ```
///
/// # Errors
///
/// Returns [`ParseError::InvalidDateTime`] when the input does not match.
pub fn parse_datetime(input: &str) -> Result<DateTime<Utc>, ParseError> {
    let text = input.trim();
    let invalid = || ParseError::InvalidDateTime(text.to_string());
    let caps = DATETIME_RE.captures(text).ok_or_else(invalid)?;

    let date = date_from(&caps).ok_or_else(invalid)?;
    let time = time_from(&caps).ok_or_else(invalid)?;
    let offset = offset_from(&caps).map_err(|()| invalid())?;
    localize(date.and_time(time), offset)
}

/// Parse a calendar date `YYYY-MM-DD`
///
/// # Errors
///
/// Returns [`ParseError::InvalidDate`] for malformed or impossible dates.
pub fn parse_date(input: &str) -> Result<NaiveDate, ParseError> {
    let text = input.trim();
    let invalid = || ParseError::InvalidDate(text.to_string());
    let caps = DATE_RE.captures(text).ok_or_else(invalid)?;
    date_from(&caps).ok_or_else(invalid)
}

/// Parse a time of day `HH:MM[:SS[.ffffff]][Z|±HH[:MM]]`
///
/// # Errors
///
/// Returns [`ParseError::InvalidTime`] when the input does not match.
pub fn parse_time(input: &str) -> Result<TimeOfDay, ParseError> {
    let text = input.trim();
    let invalid = || ParseError::InvalidTime(text.to_string());
    let caps = TIME_RE.captures(text).ok_or_else(invalid)?;

    let time = time_from(&caps).ok_or_else(invalid)?;
    let offset = offset_from(&caps).map_err(|()| invalid())?;
    Ok(TimeOfDay { time, offset })
}

/// Convert a unix timestamp to a UTC instant
///
/// Values whose magnitude exceeds [`MS_WATERSHED`] are scaled down by 1000
/// until they fit, so millisecond and microsecond timestamps are accepted.
///
/// # Errors
///
/// Returns [`ParseError::OutOfRange`] for non-finite values or instants
/// chrono cannot represent.
pub fn from_unix_seconds(seconds: f64) -> Result<DateTime<Utc>, ParseError> {
    if !seconds.is_finite() {
        return Err(ParseError::OutOfRange(seconds.to_string()));
    }

    let mut value = seconds;
    while value.abs() > MS_WATERSHED {
        value /= 1000.0;
    }

    let whole = value.floor();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let nanos = ((value - whole) * 1e9).round().min(999_999_999.0) as u32;
    #[allow(clippy::cast_possible_truncation)]
    let secs = whole as i64;
    DateTime::from_timestamp(secs, nanos).ok_or_else(|| ParseError::OutOfRange(seconds.to_string()))
}

#[cfg(test)]
mod tests {
    //! Unit tests for time::datetime.

    use chrono::{Datelike, Timelike};

    use super::*;

    /// Validates `parse_datetime` behavior for offsets and separators.
    ///
    /// Assertions:
    /// - Confirms `Z`, `+HH:MM`, `-HHMM` and missing offsets are normalised to
    ///   UTC.
    /// - Confirms fractional seconds are padded to microseconds.
    #[test]
    fn test_parse_datetime_variants() {
        let utc = parse_datetime("2030-05-06T07:08:09Z").unwrap();
        assert_eq!(utc.to_rfc3339(), "2030-05-06T07:08:09+00:00");

        let plus = parse_datetime("2030-05-06 07:08+02:00").unwrap();
        assert_eq!(plus.hour(), 5);

        let minus = parse_datetime("2030-05-06T07:08:09-0130").unwrap();
        assert_eq!((minus.hour(), minus.minute()), (8, 38));

        let naive = parse_datetime("2030-05-06T07:08:09.5").unwrap();
        assert_eq!(naive.nanosecond(), 500_000_000);
    }

    /// Validates `parse_datetime` behavior for invalid calendar values.
    ///
    /// Assertions:
    /// - Ensures impossible dates and malformed text are rejected.
    #[test]
    fn test_parse_datetime_rejects_invalid() {
        assert!(parse_datetime("2030-02-30T00:00:00").is_err());
        assert!(parse_datetime("2030-01-01T25:00:00").is_err());
        assert!(parse_datetime("tomorrow").is_err());
        assert!(parse_datetime("2030-01-01").is_err());
    }

    /// Validates `parse_date` and `parse_time` behavior.
    ///
    /// Assertions:
    /// - Confirms a plain date parses to the matching calendar day.
    /// - Confirms a time of day keeps its offset and resolves onto the day of
    ///   the reference instant.
    #[test]
    fn test_parse_date_and_time() {
        let date = parse_date("2031-12-24").unwrap();
        assert_eq!((date.year(), date.month(), date.day()), (2031, 12, 24));

        let time = parse_time("18:30+01:00").unwrap();
        let now = parse_datetime("2031-12-24T10:00:00Z").unwrap();
        let at = time.on_day_of(now).unwrap();
        assert_eq!(at.to_rfc3339(), "2031-12-24T17:30:00+00:00");

        assert!(parse_time("18h30").is_err());
        assert!(parse_date("24/12/2031").is_err());
    }

    /// Validates `from_unix_seconds` behavior for seconds and milliseconds.
    ///
    /// Assertions:
    /// - Confirms second timestamps map directly.
    /// - Confirms millisecond timestamps above the watershed are scaled.
    /// - Ensures non-finite input is rejected.
    #[test]
    fn test_from_unix_seconds_watershed() {
        let seconds = from_unix_seconds(1_900_000_000.0).unwrap();
        assert_eq!(seconds.timestamp(), 1_900_000_000);

        let millis = from_unix_seconds(1_900_000_000_000.0).unwrap();
        assert_eq!(millis.timestamp(), 1_900_000_000);

        assert!(from_unix_seconds(f64::NAN).is_err());
    }
}
