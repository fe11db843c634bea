//! Timestamp decoding for warehouse values.
//!
//! Snowflake's JSON result format renders TIMESTAMP_NTZ/LTZ as
//! `"<epoch seconds>.<nanos>"` and TIMESTAMP_TZ as the same followed by a
//! space and an offset code. Values loaded back from the log table may also
//! come through as ISO-8601 text, so both shapes are accepted.

use chrono::{DateTime, NaiveDateTime, Utc};

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Decode a warehouse timestamp into UTC. Returns `None` for anything unrecognised.
pub fn parse_utc(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Some(ts) = parse_epoch(raw) {
        return Some(ts);
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Same as [`parse_utc`], normalised to a timezone-naive UTC value.
pub fn parse_naive(raw: &str) -> Option<NaiveDateTime> {
    parse_utc(raw).map(|ts| ts.naive_utc())
}

/// Snowflake TIMESTAMP_NTZ bind value: nanoseconds since the epoch.
pub fn to_bind_nanos(ts: NaiveDateTime) -> String {
    let utc = ts.and_utc();
    let nanos = i128::from(utc.timestamp()) * 1_000_000_000
        + i128::from(utc.timestamp_subsec_nanos());
    nanos.to_string()
}

fn parse_epoch(raw: &str) -> Option<DateTime<Utc>> {
    // The epoch part is already UTC; a trailing TZ offset code only describes display.
    let epoch = raw.split_whitespace().next()?;
    let (secs, frac) = match epoch.split_once('.') {
        Some((s, f)) => (s, f),
        None => (epoch, ""),
    };

    let negative = secs.starts_with('-');
    let digits = secs.strip_prefix('-').unwrap_or(secs);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let secs: i64 = secs.parse().ok()?;
    let nanos: u32 = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<9}").parse().ok()?
    };

    // Negative epochs with a fraction count the fraction towards zero.
    if negative && nanos > 0 {
        DateTime::from_timestamp(secs - 1, 1_000_000_000 - nanos)
    } else {
        DateTime::from_timestamp(secs, nanos)
    }
}
