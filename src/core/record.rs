//! Daily record types and the payload decoder.
//!
//! A payload is one self-describing JSON object per day. Field names are
//! resolved through a [`FieldMapping`], so the decoder never assumes a
//! particular upstream export layout.

use crate::config::FieldMapping;
use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum number of payload characters quoted in a diagnostic.
const EXCERPT_CHARS: usize = 160;

/// One day's worth of the two displayed metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    /// Calendar day (unique key within a window)
    pub date: NaiveDate,
    /// Basal plus active energy expenditure (kcal)
    pub total_calories: f64,
    /// Minutes tagged as high intensity
    pub high_activity_minutes: f64,
}

impl DailyRecord {
    pub fn new(date: NaiveDate, total_calories: f64, high_activity_minutes: f64) -> Self {
        Self {
            date,
            total_calories,
            high_activity_minutes,
        }
    }
}

/// Minutes spent at one activity intensity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityBucket {
    pub intensity: String,
    pub minutes: f64,
}

impl ActivityBucket {
    pub fn new(intensity: impl Into<String>, minutes: f64) -> Self {
        Self {
            intensity: intensity.into(),
            minutes,
        }
    }
}

/// A decoded payload: the date plus whatever derivation inputs it carried.
///
/// Absent inputs stay `None` here; the deriver decides whether that is fatal.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub date: NaiveDate,
    pub basal_energy: Option<f64>,
    pub active_energy: Option<f64>,
    pub total_energy: Option<f64>,
    pub activity_buckets: Option<Vec<ActivityBucket>>,
}

/// Payload could not be turned into a [`SourceRecord`].
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Not valid JSON
    Malformed(String),
    /// Valid JSON, but not an object
    NotAnObject,
    /// The date field is absent
    MissingDate(String),
    /// The date field is present but unusable
    InvalidDate { field: String, value: String },
    /// A derivation field is present with the wrong shape
    WrongType { field: String, expected: &'static str },
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Malformed(e) => write!(f, "payload is not valid JSON: {e}"),
            DecodeError::NotAnObject => write!(f, "payload is not a JSON object"),
            DecodeError::MissingDate(field) => write!(f, "missing date field '{field}'"),
            DecodeError::InvalidDate { field, value } => {
                write!(f, "date field '{field}' has unparseable value {value}")
            }
            DecodeError::WrongType { field, expected } => {
                write!(f, "field '{field}' is not {expected}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decode one message payload.
pub fn decode(payload: &[u8], fields: &FieldMapping) -> Result<SourceRecord, DecodeError> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let object = value.as_object().ok_or(DecodeError::NotAnObject)?;

    let date = parse_date_field(object, &fields.date)?;
    let basal_energy = optional_number(object, &fields.basal_energy)?;
    let active_energy = optional_number(object, &fields.active_energy)?;
    let total_energy = match &fields.total_energy {
        Some(field) => optional_number(object, field)?,
        None => None,
    };

    let activity_buckets = match object.get(&fields.activity_buckets) {
        Some(Value::Null) | None => flat_buckets(object, fields)?,
        Some(value) => Some(parse_buckets(value, &fields.activity_buckets)?),
    };

    Ok(SourceRecord {
        date,
        basal_energy,
        active_energy,
        total_energy,
        activity_buckets,
    })
}

/// Lossy, truncated rendering of a payload for log lines.
pub fn payload_excerpt(payload: &[u8]) -> String {
    let text = String::from_utf8_lossy(payload);
    let trimmed = text.trim();
    if trimmed.chars().count() <= EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let mut excerpt: String = trimmed.chars().take(EXCERPT_CHARS).collect();
    excerpt.push_str("...");
    excerpt
}

fn parse_date_field(object: &Map<String, Value>, field: &str) -> Result<NaiveDate, DecodeError> {
    let value = match object.get(field) {
        Some(Value::Null) | None => return Err(DecodeError::MissingDate(field.to_string())),
        Some(value) => value,
    };

    let invalid = || DecodeError::InvalidDate {
        field: field.to_string(),
        value: value.to_string(),
    };

    let text = value.as_str().ok_or_else(invalid)?.trim();
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(date);
    }
    // Accept a full timestamp and keep its local calendar day.
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.date_naive())
        .map_err(|_| invalid())
}

fn optional_number(object: &Map<String, Value>, field: &str) -> Result<Option<f64>, DecodeError> {
    match object.get(field) {
        Some(Value::Null) | None => Ok(None),
        Some(value) => value.as_f64().map(Some).ok_or(DecodeError::WrongType {
            field: field.to_string(),
            expected: "a number",
        }),
    }
}

fn parse_buckets(value: &Value, field: &str) -> Result<Vec<ActivityBucket>, DecodeError> {
    let wrong = || DecodeError::WrongType {
        field: field.to_string(),
        expected: "an array of {intensity, minutes} objects",
    };

    let items = value.as_array().ok_or_else(wrong)?;
    items
        .iter()
        .map(|item| {
            let intensity = item.get("intensity").and_then(Value::as_str);
            let minutes = item.get("minutes").and_then(Value::as_f64);
            match (intensity, minutes) {
                (Some(intensity), Some(minutes)) => Ok(ActivityBucket::new(intensity, minutes)),
                _ => Err(wrong()),
            }
        })
        .collect()
}

/// Build buckets from flat per-intensity second counters, if any are configured and present.
fn flat_buckets(
    object: &Map<String, Value>,
    fields: &FieldMapping,
) -> Result<Option<Vec<ActivityBucket>>, DecodeError> {
    let mut buckets = Vec::new();
    for (intensity, field) in &fields.intensity_seconds_fields {
        if let Some(seconds) = optional_number(object, field)? {
            buckets.push(ActivityBucket::new(intensity.clone(), seconds / 60.0));
        }
    }

    if buckets.is_empty() {
        Ok(None)
    } else {
        Ok(Some(buckets))
    }
}
