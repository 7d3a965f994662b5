//! Calendar helpers for the gate dates and month-granular inactivity checks.
//!
//! Inactivity is measured in calendar months by comparing `(year, month)`
//! tuples, never elapsed days, so the 1st/15th cadence does not drift with
//! month lengths.

use crate::core::error::ArchiveError;
use chrono::{DateTime, Datelike, Local, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use ulid::Ulid;

/// Days of the month on which a run may mutate anything.
pub const GATE_DAYS: [u32; 2] = [1, 15];

pub fn today_local() -> NaiveDate {
    Local::now().date_naive()
}

pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

pub fn new_run_id() -> String {
    Ulid::new().to_string()
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, ArchiveError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| ArchiveError::ConfigError(format!("invalid date '{}': {}", raw, e)))
}

fn month_index(date: NaiveDate) -> i64 {
    i64::from(date.year()) * 12 + i64::from(date.month0())
}

/// Whole calendar months from `earlier` to `later`; negative when `earlier`
/// is in a later month.
pub fn months_between(earlier: NaiveDate, later: NaiveDate) -> i64 {
    month_index(later) - month_index(earlier)
}

pub fn is_gate_day(date: NaiveDate) -> bool {
    GATE_DAYS.contains(&date.day())
}

/// The first gate date strictly after `date`.
pub fn next_gate_date(date: NaiveDate) -> NaiveDate {
    if date.day() < 15 {
        return date.with_day(15).unwrap_or(date);
    }
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(date)
}

pub fn days_until(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}

/// Standard response envelope for machine-readable CLI output.
pub fn command_envelope(cmd: &str, status: &str, extra: JsonValue) -> JsonValue {
    let mut base = serde_json::json!({
        "envelope_version": "1.0.0",
        "ts": now_utc().to_rfc3339(),
        "event_id": new_run_id(),
        "cmd": cmd,
        "status": status
    });
    if let (Some(base_obj), Some(extra_obj)) = (base.as_object_mut(), extra.as_object()) {
        for (k, v) in extra_obj {
            base_obj.insert(k.clone(), v.clone());
        }
    }
    base
}
