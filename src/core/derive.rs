//! Metric derivation from decoded records.
//!
//! The deriver does not model metabolism: energy components arrive already
//! computed upstream and are only summed here.

use crate::core::record::{ActivityBucket, DailyRecord, SourceRecord};
use serde::{Deserialize, Serialize};

/// The two displayed metrics for one day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub total_calories: f64,
    pub high_activity_minutes: f64,
}

/// Which derivation input a failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricRole {
    BasalEnergy,
    ActiveEnergy,
    TotalEnergy,
    ActivityBuckets,
}

impl std::fmt::Display for MetricRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MetricRole::BasalEnergy => "basal energy",
            MetricRole::ActiveEnergy => "active energy",
            MetricRole::TotalEnergy => "total energy",
            MetricRole::ActivityBuckets => "activity buckets",
        };
        f.write_str(name)
    }
}

/// A well-formed record that cannot produce the metrics.
#[derive(Debug, Clone, PartialEq)]
pub enum DerivationError {
    MissingField(MetricRole),
    NegativeValue(MetricRole, f64),
    NonFinite(MetricRole),
}

impl std::fmt::Display for DerivationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DerivationError::MissingField(role) => write!(f, "missing {role}"),
            DerivationError::NegativeValue(role, value) => {
                write!(f, "{role} is negative ({value})")
            }
            DerivationError::NonFinite(role) => write!(f, "{role} is not a finite number"),
        }
    }
}

impl std::error::Error for DerivationError {}

/// Compute both metrics for a decoded record.
///
/// Total calories are basal plus active energy. A record without a basal
/// component falls back to its precomputed total, if the mapping reads one.
pub fn derive(
    record: &SourceRecord,
    high_label: &str,
) -> Result<DerivedMetrics, DerivationError> {
    let total_calories = match (record.basal_energy, record.total_energy) {
        (None, Some(total)) => component(Some(total), MetricRole::TotalEnergy)?,
        (basal, _) => {
            component(basal, MetricRole::BasalEnergy)?
                + component(record.active_energy, MetricRole::ActiveEnergy)?
        }
    };
    let buckets = record
        .activity_buckets
        .as_deref()
        .ok_or(DerivationError::MissingField(MetricRole::ActivityBuckets))?;

    Ok(DerivedMetrics {
        total_calories,
        high_activity_minutes: high_activity_minutes(buckets, high_label)?,
    })
}

/// Derive and attach the record date.
pub fn derive_record(record: &SourceRecord, high_label: &str) -> Result<DailyRecord, DerivationError> {
    let metrics = derive(record, high_label)?;
    Ok(DailyRecord::new(
        record.date,
        metrics.total_calories,
        metrics.high_activity_minutes,
    ))
}

/// Sum the minutes of every bucket tagged with `high_label` (ASCII case-insensitive).
pub fn high_activity_minutes(
    buckets: &[ActivityBucket],
    high_label: &str,
) -> Result<f64, DerivationError> {
    let mut total = 0.0;
    for bucket in buckets
        .iter()
        .filter(|b| b.intensity.trim().eq_ignore_ascii_case(high_label))
    {
        total += component(Some(bucket.minutes), MetricRole::ActivityBuckets)?;
    }
    Ok(total)
}

fn component(value: Option<f64>, role: MetricRole) -> Result<f64, DerivationError> {
    let value = value.ok_or(DerivationError::MissingField(role))?;
    if !value.is_finite() {
        return Err(DerivationError::NonFinite(role));
    }
    if value < 0.0 {
        return Err(DerivationError::NegativeValue(role, value));
    }
    Ok(value)
}
