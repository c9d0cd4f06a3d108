use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

/// Integers above this are epoch milliseconds, below it epoch seconds.
const MILLIS_THRESHOLD: i64 = 10_000_000_000;

/// Parse an engine timestamp. `0`, empty strings and unparseable values are
/// treated as absent.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let raw = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            from_epoch(raw)
        }
        Value::String(s) => parse_str(s.trim()),
        _ => None,
    }
}

fn from_epoch(raw: i64) -> Option<DateTime<Utc>> {
    if raw <= 0 {
        return None;
    }
    if raw > MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(raw)
    } else {
        DateTime::from_timestamp(raw, 0)
    }
}

fn parse_str(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if let Ok(raw) = s.parse::<i64>() {
        return from_epoch(raw);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Naive ISO timestamps are UTC.
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc())
}
