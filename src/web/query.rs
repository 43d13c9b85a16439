//! Query-string parameters shared by the event, stats and stream endpoints.

use crate::events::{EventQuery, MAX_QUERY_LIMIT};
use crate::filter::{compile_permissive, CompiledFilter};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;

pub const DEFAULT_LIMIT: usize = 200;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiParams {
    pub q: Option<String>,
    pub since: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<String>,
}

/// Resolved meaning of the `since` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Since {
    Cursor(u64),
    /// Time floor derived from a relative duration.
    After(DateTime<Utc>),
}

impl ApiParams {
    pub fn filter(&self) -> CompiledFilter {
        compile_permissive(self.q.as_deref())
    }

    /// Builds the store query. An explicit `from` wins over a duration `since`.
    pub fn event_query(&self, now: DateTime<Utc>) -> EventQuery {
        let since = self.since.as_deref().and_then(|s| parse_since(s, now));
        let (since_cursor, since_floor) = match since {
            Some(Since::Cursor(c)) => (Some(c), None),
            Some(Since::After(ts)) => (None, Some(ts)),
            None => (None, None),
        };

        EventQuery {
            since_cursor,
            from: self.from.as_deref().and_then(parse_timestamp).or(since_floor),
            to: self.to.as_deref().and_then(parse_timestamp),
            limit: parse_limit(self.limit.as_deref()),
        }
    }

    /// Starting cursor for a live stream; durations are not accepted here.
    pub fn stream_cursor(&self) -> Option<u64> {
        match self.since.as_deref().and_then(|s| parse_since(s, Utc::now())) {
            Some(Since::Cursor(c)) => Some(c),
            _ => None,
        }
    }
}

/// An integer is a cursor (raised to at least 1); otherwise `<n>(ms|s|m|h|d)`
/// is a duration before `now`.
pub fn parse_since(raw: &str, now: DateTime<Utc>) -> Option<Since> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Some(Since::Cursor(n.max(1) as u64));
    }
    parse_duration(raw).map(|d| Since::After(now - d))
}

pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit())?;
    let (digits, unit) = raw.split_at(split);
    if digits.is_empty() {
        return None;
    }
    let n: i64 = digits.parse().ok()?;

    let millis = match unit {
        "ms" => n,
        "s" => n.checked_mul(1_000)?,
        "m" => n.checked_mul(60_000)?,
        "h" => n.checked_mul(3_600_000)?,
        "d" => n.checked_mul(86_400_000)?,
        _ => return None,
    };
    Duration::try_milliseconds(millis)
}

/// RFC 3339 instant or a bare `YYYY-MM-DD` date (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Defaults to 200 and clamps into `[0, 50000]`.
pub fn parse_limit(raw: Option<&str>) -> usize {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return DEFAULT_LIMIT;
    };
    match raw.parse::<f64>() {
        Ok(n) if n.is_finite() => n.floor().clamp(0.0, MAX_QUERY_LIMIT as f64) as usize,
        _ => DEFAULT_LIMIT,
    }
}
