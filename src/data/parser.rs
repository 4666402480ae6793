//! Raw value parsers for provider and archive fields
//!
//! Lap times arrive as `m:ss.fff` strings from the results API and as plain
//! seconds from precomputed archives. Archive dates come in whatever format the
//! exporting tool chose, so date parsing tries several layouts.
//!
//! # Example
//!
//! ```
//! use f1predict::data::parser::{parse_date, parse_lap_time};
//!
//! assert_eq!(parse_lap_time("1:18.576"), Some(78.576));
//! assert!(parse_date("2024-03-02 00:00:00").is_some());
//! ```

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use std::sync::OnceLock;

/// Accepted date layouts, tried in order
///
/// Slash dates read month-first; day-first only matches when the leading
/// field cannot be a month.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d/%m/%Y", "%Y%m%d"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%SZ",
];

fn lap_time_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:(\d{1,2}):)?(\d{1,3}(?:\.\d+)?)$").expect("valid lap time pattern")
    })
}

/// Parse a lap time string into seconds
///
/// Returns `None` for anything that is not a positive time: empty strings,
/// status text such as "DNF", or malformed values.
pub fn parse_lap_time(raw: &str) -> Option<f64> {
    let caps = lap_time_regex().captures(raw.trim())?;

    let minutes: f64 = match caps.get(1) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0.0,
    };
    let seconds: f64 = caps.get(2)?.as_str().parse().ok()?;

    // "1:75.000" is not a lap time
    if caps.get(1).is_some() && seconds >= 60.0 {
        return None;
    }

    let total = minutes * 60.0 + seconds;
    if total > 0.0 && total.is_finite() {
        Some(total)
    } else {
        None
    }
}

/// Best (minimum) valid time across qualifying segments
pub fn best_lap_time<S: AsRef<str>>(times: &[S]) -> Option<f64> {
    times
        .iter()
        .filter_map(|t| parse_lap_time(t.as_ref()))
        .min_by(|a, b| a.total_cmp(b))
}

/// Parse a calendar date from any of the supported layouts
///
/// Time-of-day components are dropped; only the calendar date matters for
/// "strictly before" queries.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|dt| dt.date())
        })
}
