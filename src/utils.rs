use crate::error::{EngineError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
#[cfg(test)]
use chrono::{Datelike, Days};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// An inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(EngineError::InvalidWindow {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    pub fn calendar_year(year: i32) -> Result<Self> {
        let start = NaiveDate::from_ymd_opt(year, 1, 1).ok_or(EngineError::InvalidYear(year))?;
        let end = NaiveDate::from_ymd_opt(year, 12, 31).ok_or(EngineError::InvalidYear(year))?;
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Number of days covered, both endpoints included.
    pub fn len_days(&self) -> i64 {
        inclusive_days(self.start, self.end)
    }

    /// Overlapping sub-window, or `None` when the two windows are disjoint.
    pub fn intersect(&self, other: &DateWindow) -> Option<DateWindow> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if start > end {
            None
        } else {
            Some(DateWindow { start, end })
        }
    }
}

/// Whole calendar days from `start` to `end` (negative when `end` precedes `start`).
pub fn day_count(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days()
}

pub fn inclusive_days(start: NaiveDate, end: NaiveDate) -> i64 {
    day_count(start, end) + 1
}

/// Fractional days between two instants, before any rounding convention is applied.
pub fn fractional_days(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    (to - from).num_milliseconds() as f64 / MILLIS_PER_DAY
}

pub fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(chrono::NaiveTime::MIN)
}

#[cfg(test)]
pub(crate) fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let next_month = if month == 12 { 1 } else { month + 1 };
    let next_year = if month == 12 { year + 1 } else { year };

    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.checked_sub_days(Days::new(1))
}

/// Calendar month windows that exactly tile `window`.
#[cfg(test)]
pub(crate) fn month_windows(window: &DateWindow) -> Vec<DateWindow> {
    let mut windows = Vec::new();
    let mut current = window.start;

    while current <= window.end {
        let month_end = match last_day_of_month(current.year(), current.month()) {
            Some(end) => end.min(window.end),
            None => break,
        };
        windows.push(DateWindow {
            start: current,
            end: month_end,
        });
        match month_end.checked_add_days(Days::new(1)) {
            Some(next) => current = next,
            None => break,
        }
    }

    windows
}

/// Splits `amount` by `weights`, falling back to an equal split when the weights sum to <= 0.
pub fn split_by_weights(amount: f64, weights: &[f64]) -> Vec<f64> {
    if weights.is_empty() {
        return Vec::new();
    }

    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        let share = amount / weights.len() as f64;
        return vec![share; weights.len()];
    }

    weights.iter().map(|w| amount * w / total).collect()
}

/// Reads a date out of whatever shape the persistence layer stored it in.
///
/// Accepts ISO dates, RFC 3339 and naive ISO date-times, `DD/MM/YYYY`, epoch
/// milliseconds and `{ "_seconds": n }` / `{ "seconds": n }` timestamp objects.
/// Anything else is treated as missing.
pub fn parse_date_value(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::String(s) => parse_date_str(s),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(DateTime::from_timestamp_millis)
            .map(|dt| dt.date_naive()),
        Value::Object(map) => map
            .get("_seconds")
            .or_else(|| map.get("seconds"))
            .and_then(Value::as_i64)
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|dt| dt.date_naive()),
        _ => None,
    }
}

pub fn parse_date_str(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local().date());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.date());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(dt.date());
    }
    NaiveDate::parse_from_str(s, "%d/%m/%Y").ok()
}

/// Reads a monetary amount; numeric strings may use a comma as decimal separator.
pub fn parse_amount_value(value: &Value) -> Option<f64> {
    let amount = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            let normalized = if trimmed.contains(',') && !trimmed.contains('.') {
                trimmed.replace(',', ".")
            } else {
                trimmed.replace(',', "")
            };
            normalized.parse::<f64>().ok()
        }
        _ => None,
    }?;

    amount.is_finite().then_some(amount)
}

/// Reads an identifier; numeric ids are stringified, blank strings are missing.
pub fn parse_id_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn deserialize_lenient_date<'de, D>(deserializer: D) -> std::result::Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_date_value))
}

pub fn deserialize_lenient_amount<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_amount_value).unwrap_or(0.0))
}

pub fn deserialize_lenient_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_id_value))
}
