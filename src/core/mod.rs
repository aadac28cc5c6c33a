//! Core aggregation primitives.
//!
//! This module contains:
//! - Payload decoding into typed daily records
//! - Metric derivation (total calories, high-activity minutes)
//! - The rolling window store
//! - Snapshots handed to rendering sinks

pub mod derive;
pub mod record;
pub mod snapshot;
pub mod window;

// Re-export commonly used types
pub use derive::{derive, derive_record, DerivationError, DerivedMetrics, MetricRole};
pub use record::{decode, payload_excerpt, ActivityBucket, DailyRecord, DecodeError, SourceRecord};
pub use snapshot::{Snapshot, WindowSummary};
pub use window::{UpsertOutcome, UpsertResult, WindowStore, WindowTotals};
