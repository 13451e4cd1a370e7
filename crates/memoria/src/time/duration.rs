//! Duration parsing from strings
//!
//! Accepts three families of input, tried in this order:
//!
//! - clock notation: `"45"`, `"05:30"`, `"01:05:30.25"`, `"2 days, 01:00:00"`
//! - ISO 8601 durations: `"P1D"`, `"PT1H30M"`, `"P1DT0.5S"`
//! - unit expressions: `"30 minutes"`, `"1 hour 30 minutes"`, `"2h 15m"`,
//!   `"1.5 days"`

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use super::ParseError;

/// Static clock-notation pattern compiled once at first use
#[allow(clippy::expect_used)]
static CLOCK_DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:(?P<days>\d+) (?:days?, )?)?(?:(?P<first>\d+):)?(?:(?P<second>\d+):)?(?P<seconds>\d+)(?:\.(?P<fraction>\d{1,6})\d{0,6})?$",
    )
    .expect("CLOCK_DURATION_RE pattern is valid and well-formed")
});

/// Static ISO 8601 duration pattern compiled once at first use
#[allow(clippy::expect_used)]
static ISO_DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\+?P(?:(?P<days>\d+(?:\.\d+)?)D)?(?:T(?:(?P<hours>\d+(?:\.\d+)?)H)?(?:(?P<minutes>\d+(?:\.\d+)?)M)?(?:(?P<seconds>\d+(?:\.\d+)?)S)?)?$",
    )
    .expect("ISO_DURATION_RE pattern is valid and well-formed")
});

const SECONDS_PER_MINUTE: f64 = 60.0;
const SECONDS_PER_HOUR: f64 = 3_600.0;
const SECONDS_PER_DAY: f64 = 86_400.0;
const SECONDS_PER_WEEK: f64 = 604_800.0;

/// Parse a duration string into a Duration
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use memoria::time::parse_duration;
///
/// assert_eq!(parse_duration("30 minutes").unwrap(), Duration::from_secs(1800));
/// assert_eq!(parse_duration("1h 30m").unwrap(), Duration::from_secs(5400));
/// assert_eq!(parse_duration("PT2H").unwrap(), Duration::from_secs(7200));
/// assert_eq!(parse_duration("01:00:05").unwrap(), Duration::from_secs(3605));
/// ```
///
/// # Errors
///
/// Returns a [`ParseError`] for empty input, unknown units, malformed
/// text or totals a `Duration` cannot hold.
pub fn parse_duration(input: &str) -> Result<Duration, ParseError> {
    let text = input.trim();
    if text.is_empty() {
        return Err(ParseError::Empty);
    }

    if let Some(duration) = parse_clock_duration(text)? {
        return Ok(duration);
    }
    if let Some(duration) = parse_iso_duration(text)? {
        return Ok(duration);
    }
    parse_unit_expression(text)
}

fn seconds_to_duration(input: &str, seconds: f64) -> Result<Duration, ParseError> {
    Duration::try_from_secs_f64(seconds).map_err(|_| ParseError::OutOfRange(input.to_string()))
}

fn capture_f64(caps: &regex::Captures<'_>, name: &str) -> f64 {
    caps.name(name).and_then(|m| m.as_str().parse::<f64>().ok()).unwrap_or(0.0)
}

fn parse_clock_duration(text: &str) -> Result<Option<Duration>, ParseError> {
    let Some(caps) = CLOCK_DURATION_RE.captures(text) else {
        return Ok(None);
    };

    // With a single "N:" group the value is minutes, with two it is hours then minutes.
    let (hours, minutes) = match (caps.name("first"), caps.name("second")) {
        (Some(_), Some(_)) => (capture_f64(&caps, "first"), capture_f64(&caps, "second")),
        (Some(_), None) => (0.0, capture_f64(&caps, "first")),
        _ => (0.0, 0.0),
    };
    let fraction = caps
        .name("fraction")
        .map(|m| format!("0.{}", m.as_str()).parse::<f64>().unwrap_or(0.0))
        .unwrap_or(0.0);

    let seconds = capture_f64(&caps, "seconds") + fraction;
    let total = capture_f64(&caps, "days").mul_add(
        SECONDS_PER_DAY,
        hours.mul_add(SECONDS_PER_HOUR, minutes.mul_add(SECONDS_PER_MINUTE, seconds)),
    );
    seconds_to_duration(text, total).map(Some)
}

fn parse_iso_duration(text: &str) -> Result<Option<Duration>, ParseError> {
    let Some(caps) = ISO_DURATION_RE.captures(text) else {
        return Ok(None);
    };
    // A bare "P" or "PT" carries no components.
    if ["days", "hours", "minutes", "seconds"].iter().all(|name| caps.name(name).is_none()) {
        return Err(ParseError::InvalidDuration(text.to_string()));
    }

    let minutes = capture_f64(&caps, "minutes")
        .mul_add(SECONDS_PER_MINUTE, capture_f64(&caps, "seconds"));
    let total = capture_f64(&caps, "days").mul_add(
        SECONDS_PER_DAY,
        capture_f64(&caps, "hours").mul_add(SECONDS_PER_HOUR, minutes),
    );
    seconds_to_duration(text, total).map(Some)
}

fn unit_seconds(unit: &str) -> Option<f64> {
    let seconds = match unit.to_ascii_lowercase().as_str() {
        "ms" | "millisecond" | "milliseconds" => 0.001,
        "s" | "sec" | "secs" | "second" | "seconds" => 1.0,
        "m" | "min" | "mins" | "minute" | "minutes" => SECONDS_PER_MINUTE,
        "h" | "hr" | "hrs" | "hour" | "hours" => SECONDS_PER_HOUR,
        "d" | "day" | "days" => SECONDS_PER_DAY,
        "w" | "week" | "weeks" => SECONDS_PER_WEEK,
        _ => return None,
    };
    Some(seconds)
}

/// Sum of `<number> <unit>` terms, separated by whitespace, commas or "and".
fn parse_unit_expression(text: &str) -> Result<Duration, ParseError> {
    let mut total = 0.0;
    let mut terms = 0usize;
    let mut chars = text.char_indices().peekable();

    while let Some(&(start, ch)) = chars.peek() {
        if ch.is_whitespace() || ch == ',' {
            chars.next();
            continue;
        }

        if ch.is_ascii_digit() || ch == '.' {
            let mut end = start;
            while let Some(&(idx, c)) = chars.peek() {
                if c.is_ascii_digit() || c == '.' {
                    end = idx + c.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            let number = &text[start..end];
            let value: f64 =
                number.parse().map_err(|_| ParseError::InvalidDuration(text.to_string()))?;

            while chars.peek().is_some_and(|&(_, c)| c.is_whitespace()) {
                chars.next();
            }

            let unit_start = chars.peek().map_or(text.len(), |&(idx, _)| idx);
            let mut unit_end = unit_start;
            while let Some(&(idx, c)) = chars.peek() {
                if c.is_ascii_alphabetic() {
                    unit_end = idx + c.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            let unit = &text[unit_start..unit_end];
            if unit.is_empty() {
                return Err(ParseError::InvalidDuration(text.to_string()));
            }
            let factor = unit_seconds(unit).ok_or_else(|| ParseError::UnknownUnit {
                input: text.to_string(),
                unit: unit.to_string(),
            })?;

            total = value.mul_add(factor, total);
            terms += 1;
            continue;
        }

        if ch.is_ascii_alphabetic() {
            // Only the "and" connector may appear where a number is expected.
            let rest = &text[start..];
            let word_len = rest.find(|c: char| !c.is_ascii_alphabetic()).unwrap_or(rest.len());
            if rest[..word_len].eq_ignore_ascii_case("and") && terms > 0 {
                for _ in 0..word_len {
                    chars.next();
                }
                continue;
            }
        }

        return Err(ParseError::InvalidDuration(text.to_string()));
    }

    if terms == 0 {
        return Err(ParseError::InvalidDuration(text.to_string()));
    }
    seconds_to_duration(text, total)
}
