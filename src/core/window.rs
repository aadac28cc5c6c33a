//! Rolling window of daily records keyed by calendar date.
//!
//! The window is anchored on the latest date ever observed rather than on the
//! wall clock, so replaying old exports behaves exactly like live delivery.

use crate::core::record::DailyRecord;
use crate::core::snapshot::Snapshot;
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What an upsert did to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// New date added
    Inserted,
    /// Existing date overwritten with different values
    Replaced,
    /// Existing date overwritten with identical values
    Unchanged,
    /// Date already outside the horizon; window untouched
    Stale,
}

impl UpsertOutcome {
    /// Whether the record is now part of the window.
    pub fn is_accepted(&self) -> bool {
        !matches!(self, UpsertOutcome::Stale)
    }
}

/// Result of a single [`WindowStore::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertResult {
    pub outcome: UpsertOutcome,
    /// Whether `latest_date` moved forward
    pub advanced: bool,
    /// Number of entries dropped because the horizon moved
    pub evicted: usize,
}

/// Running sums of both series over the retained entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowTotals {
    pub total_calories: f64,
    pub high_activity_minutes: f64,
}

impl WindowTotals {
    fn add(&mut self, record: &DailyRecord) {
        self.total_calories += record.total_calories;
        self.high_activity_minutes += record.high_activity_minutes;
    }

    fn subtract(&mut self, record: &DailyRecord) {
        self.total_calories -= record.total_calories;
        self.high_activity_minutes -= record.high_activity_minutes;
    }
}

/// Ordered, deduplicated store of the most recent `horizon_days` days.
///
/// Invariant between calls: every retained date `d` satisfies
/// `latest_date - d < horizon_days`, dates are unique, and `latest_date`
/// never decreases.
#[derive(Debug, Clone)]
pub struct WindowStore {
    horizon_days: u32,
    records: BTreeMap<NaiveDate, DailyRecord>,
    latest_date: Option<NaiveDate>,
    totals: WindowTotals,
}

impl WindowStore {
    /// Create an empty window. A zero horizon is treated as one day.
    pub fn new(horizon_days: u32) -> Self {
        Self {
            horizon_days: horizon_days.max(1),
            records: BTreeMap::new(),
            latest_date: None,
            totals: WindowTotals::default(),
        }
    }

    /// Insert or replace the entry for `record.date`, then evict if the horizon moved.
    pub fn upsert(&mut self, record: DailyRecord) -> UpsertResult {
        if self.is_outside_horizon(record.date) {
            return UpsertResult {
                outcome: UpsertOutcome::Stale,
                advanced: false,
                evicted: 0,
            };
        }

        let outcome = match self.records.insert(record.date, record) {
            None => {
                self.totals.add(&record);
                UpsertOutcome::Inserted
            }
            Some(previous) if previous == record => UpsertOutcome::Unchanged,
            Some(previous) => {
                self.totals.subtract(&previous);
                self.totals.add(&record);
                UpsertOutcome::Replaced
            }
        };

        let advanced = self.latest_date.map_or(true, |latest| record.date > latest);
        let evicted = if advanced {
            self.latest_date = Some(record.date);
            self.evict_expired()
        } else {
            0
        };

        UpsertResult {
            outcome,
            advanced,
            evicted,
        }
    }

    /// All retained entries ascending by date.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::with_totals(
            self.records.values().copied().collect(),
            self.latest_date,
            self.horizon_days,
            self.totals,
        )
    }

    pub fn get(&self, date: NaiveDate) -> Option<&DailyRecord> {
        self.records.get(&date)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Maximum date ever observed.
    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.latest_date
    }

    pub fn horizon_days(&self) -> u32 {
        self.horizon_days
    }

    /// Oldest date still inside the horizon.
    pub fn earliest_retainable(&self) -> Option<NaiveDate> {
        let latest = self.latest_date?;
        // Underflow means every representable date is retainable.
        Some(
            latest
                .checked_sub_days(Days::new(u64::from(self.horizon_days - 1)))
                .unwrap_or(NaiveDate::MIN),
        )
    }

    /// Running sums over the retained entries.
    pub fn totals(&self) -> WindowTotals {
        self.totals
    }

    fn is_outside_horizon(&self, date: NaiveDate) -> bool {
        self.earliest_retainable()
            .map_or(false, |earliest| date < earliest)
    }

    fn evict_expired(&mut self) -> usize {
        let Some(earliest) = self.earliest_retainable() else {
            return 0;
        };

        let retained = self.records.split_off(&earliest);
        let expired = std::mem::replace(&mut self.records, retained);
        for record in expired.values() {
            self.totals.subtract(record);
        }

        // Avoid carrying float residue once the window drains.
        if self.records.is_empty() {
            self.totals = WindowTotals::default();
        }

        expired.len()
    }
}

impl Default for WindowStore {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_HORIZON_DAYS)
    }
}
