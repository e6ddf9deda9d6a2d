//! The synchronized launch counter snapshot.
//!
//! A snapshot is always complete: the server persists and fans out whole
//! values, and devices replace their local copy with whatever arrives last.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Per-user launch counters grouped by calendar granularity.
///
/// Maps are ordered so that two serializations of the same value are
/// byte-identical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LaunchAggregate {
    pub user_id: i64,
    pub total: u64,
    /// Keyed by year, e.g. `"2024"`.
    #[serde(default)]
    pub year_data: BTreeMap<String, u64>,
    /// Keyed by `"year-month"`, e.g. `"2024-1"`.
    #[serde(default)]
    pub month_data: BTreeMap<String, u64>,
    /// Keyed by `"year-month-day"`, e.g. `"2024-1-1"`.
    #[serde(default)]
    pub day_data: BTreeMap<String, u64>,
    /// RFC 3339 timestamp of the most recent launch, `null` before the first.
    pub last_launch: Option<DateTime<Utc>>,
}

impl LaunchAggregate {
    /// The zero-valued snapshot a user starts with.
    pub fn empty(user_id: i64) -> Self {
        Self {
            user_id,
            total: 0,
            year_data: BTreeMap::new(),
            month_data: BTreeMap::new(),
            day_data: BTreeMap::new(),
            last_launch: None,
        }
    }

    /// Record one launch at `at`, bucketing it by the calendar date in `at`'s
    /// own time zone.
    pub fn record_launch<Tz: TimeZone>(&mut self, at: DateTime<Tz>) {
        let date = at.date_naive();
        let (y, m, d) = (date.year(), date.month(), date.day());

        self.total += 1;
        *self.year_data.entry(year_key(y)).or_insert(0) += 1;
        *self.month_data.entry(month_key(y, m)).or_insert(0) += 1;
        *self.day_data.entry(day_key(y, m, d)).or_insert(0) += 1;
        self.last_launch = Some(at.with_timezone(&Utc));
    }

    /// Whether `total` matches the sum of every granularity map.
    ///
    /// Not enforced anywhere; the server only logs disagreements.
    pub fn is_consistent(&self) -> bool {
        [&self.year_data, &self.month_data, &self.day_data]
            .iter()
            .all(|m| m.values().sum::<u64>() == self.total)
    }
}

pub fn year_key(year: i32) -> String {
    year.to_string()
}

pub fn month_key(year: i32, month: u32) -> String {
    format!("{year}-{month}")
}

pub fn day_key(year: i32, month: u32, day: u32) -> String {
    format!("{year}-{month}-{day}")
}
