//! Duration strings in the `300ms` / `15s` / `1m30s` style.

use std::time::Duration;

use thiserror::Error;

/// Error type for duration parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DurationParseError {
    #[error("Empty duration string")]
    EmptyString,

    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    #[error("Unknown unit: {0}")]
    UnknownUnit(String),

    #[error("Missing unit after number: {0}")]
    MissingUnit(String),
}

/// Parse a duration string into a [`Duration`].
///
/// Accepts a sequence of `<number><unit>` pairs, where unit is one of
/// `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. Numbers may be fractional.
///
/// ```
/// use std::time::Duration;
/// use keeper_common::duration::parse_duration;
///
/// assert_eq!(parse_duration("15s").unwrap(), Duration::from_secs(15));
/// assert_eq!(parse_duration("300ms").unwrap(), Duration::from_millis(300));
/// assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, DurationParseError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(DurationParseError::EmptyString);
    }

    let mut total = Duration::ZERO;
    let mut chars = s.chars().peekable();

    while chars.peek().is_some() {
        let mut number = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                number.push(c);
                chars.next();
            } else {
                break;
            }
        }

        let mut unit = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                break;
            }
            unit.push(c);
            chars.next();
        }

        if number.is_empty() {
            return Err(DurationParseError::InvalidNumber(unit));
        }
        if unit.is_empty() {
            return Err(DurationParseError::MissingUnit(number));
        }

        let nanos_per_unit: u128 = match unit.as_str() {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 3600 * 1_000_000_000,
            other => return Err(DurationParseError::UnknownUnit(other.to_string())),
        };

        let nanos = scaled_nanos(&number, nanos_per_unit)
            .ok_or_else(|| DurationParseError::InvalidNumber(number.clone()))?;
        total = u64::try_from(nanos)
            .ok()
            .and_then(|n| total.checked_add(Duration::from_nanos(n)))
            .ok_or_else(|| DurationParseError::InvalidNumber(number.clone()))?;
    }

    Ok(total)
}

/// `number * nanos_per_unit`, rounded to the nearest nanosecond.
///
/// `number` is a decimal with an optional fraction; fraction digits beyond
/// the eighteenth are ignored.
fn scaled_nanos(number: &str, nanos_per_unit: u128) -> Option<u128> {
    let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
    if (whole.is_empty() && frac.is_empty()) || frac.contains('.') {
        return None;
    }

    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut nanos = whole.checked_mul(nanos_per_unit)?;

    let frac = &frac[..frac.len().min(18)];
    if !frac.is_empty() {
        let digits: u128 = frac.parse().ok()?;
        let scale = 10u128.pow(frac.len() as u32);
        nanos = nanos.checked_add((digits * nanos_per_unit + scale / 2) / scale)?;
    }

    Some(nanos)
}
