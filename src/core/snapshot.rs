//! Immutable, time-ordered views of the window handed to rendering sinks.

use crate::core::record::DailyRecord;
use crate::core::window::WindowTotals;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// The window's two series at one instant, ascending by date.
///
/// Every snapshot owns its points; two snapshots never share storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Monotonic publish counter (0 until the engine stamps it)
    pub sequence: u64,
    /// When the snapshot was materialized
    pub published_at: DateTime<Utc>,
    /// Window length the points were retained under
    pub horizon_days: u32,
    /// Maximum date observed when the snapshot was taken
    pub latest_date: Option<NaiveDate>,
    /// One point per retained day
    pub points: Vec<DailyRecord>,
    /// Sums of both series over `points`
    #[serde(default)]
    pub totals: WindowTotals,
}

impl Snapshot {
    /// Snapshot over arbitrary points; the totals are summed here.
    pub fn new(points: Vec<DailyRecord>, latest_date: Option<NaiveDate>, horizon_days: u32) -> Self {
        let totals = WindowTotals {
            total_calories: points.iter().map(|p| p.total_calories).sum(),
            high_activity_minutes: points.iter().map(|p| p.high_activity_minutes).sum(),
        };
        Self::with_totals(points, latest_date, horizon_days, totals)
    }

    /// Snapshot whose totals were already maintained by the window.
    pub(crate) fn with_totals(
        points: Vec<DailyRecord>,
        latest_date: Option<NaiveDate>,
        horizon_days: u32,
        totals: WindowTotals,
    ) -> Self {
        Self {
            sequence: 0,
            published_at: Utc::now(),
            horizon_days,
            latest_date,
            points,
            totals,
        }
    }

    /// Stamp the publish sequence number.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.points.iter().map(|p| p.date)
    }

    pub fn total_calories_series(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.total_calories)
    }

    pub fn high_activity_series(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.high_activity_minutes)
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.first().map(|p| p.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.date)
    }

    /// Descriptive statistics over both series.
    pub fn summary(&self) -> WindowSummary {
        let calories: Vec<f64> = self.total_calories_series().collect();
        let minutes: Vec<f64> = self.high_activity_series().collect();

        WindowSummary {
            days: self.points.len(),
            first_date: self.first_date(),
            last_date: self.last_date(),
            total_calories_sum: self.totals.total_calories,
            mean_total_calories: finite(Statistics::mean(&calories)),
            std_dev_total_calories: finite(Statistics::std_dev(&calories)),
            high_activity_minutes_sum: self.totals.high_activity_minutes,
            mean_high_activity_minutes: finite(Statistics::mean(&minutes)),
            std_dev_high_activity_minutes: finite(Statistics::std_dev(&minutes)),
        }
    }
}

/// Aggregate figures for one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSummary {
    pub days: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub total_calories_sum: f64,
    pub mean_total_calories: Option<f64>,
    /// Sample standard deviation; `None` with fewer than two days
    pub std_dev_total_calories: Option<f64>,
    pub high_activity_minutes_sum: f64,
    pub mean_high_activity_minutes: Option<f64>,
    pub std_dev_high_activity_minutes: Option<f64>,
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}
