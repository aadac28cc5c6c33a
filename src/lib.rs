//! Activity Window - rolling-window aggregation of daily activity records.
//!
//! Daily biometric records arrive as one message each on an ordered,
//! at-least-once stream. The engine decodes each payload, derives total
//! calories and high-activity minutes, keeps the most recent N days in a
//! deduplicated window, and publishes a fresh snapshot of both series to a
//! rendering sink after every change.
//!
//! # Delivery Guarantees Tolerated
//!
//! - **Duplicates**: a redelivered day replaces itself (last write by arrival wins)
//! - **Reordering**: late days inside the horizon are slotted in by date
//! - **Malformed payloads**: logged and skipped, never fatal
//! - **Slow sinks**: intermediate snapshots may be coalesced; the latest always wins
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Activity Window                          │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────────┐   │
//! │  │  Source  │──▶│  Decode  │──▶│  Derive  │──▶│ Window Store │   │
//! │  │ (replay) │   │  (JSON)  │   │ (metrics)│   │ (N days)     │   │
//! │  └──────────┘   └──────────┘   └──────────┘   └──────────────┘   │
//! │                                                      │           │
//! │                      ┌──────────┐             ┌──────────────┐   │
//! │                      │  Stats   │             │  Publisher   │   │
//! │                      └──────────┘             │  ──▶ Sinks   │   │
//! │                                               └──────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use activity_window::{
//!     create_shared_stats, AggregationEngine, EngineConfig, LatestSnapshot, SnapshotPublisher,
//! };
//!
//! let stats = create_shared_stats();
//! let latest = LatestSnapshot::new();
//! let publisher = SnapshotPublisher::inline(latest.clone(), stats.clone());
//! let mut engine = AggregationEngine::new(EngineConfig::default(), publisher, stats)
//!     .expect("valid configuration");
//!
//! engine.on_message(br#"{"day": "2024-03-01", "basal_calories": 1500,
//!     "active_calories": 300, "activity_buckets": [{"intensity": "high", "minutes": 20}]}"#);
//! assert_eq!(latest.get().map(|s| s.len()), Some(1));
//! ```

pub mod config;
pub mod core;
pub mod engine;
pub mod publish;
pub mod source;
pub mod stats;

#[cfg(feature = "gateway")]
pub mod gateway;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use crate::core::{DailyRecord, Snapshot, UpsertOutcome, WindowStore, WindowSummary};
pub use config::{Config, ConfigError, EngineConfig, FieldMapping};
pub use engine::{AggregationEngine, IngestError, MessageOutcome, RunSummary, StopReason};
pub use publish::{
    ConsoleChartSink, FanoutSink, JsonlExportSink, LatestSnapshot, PublishOutcome, SinkError,
    SnapshotPublisher, SnapshotSink,
};
pub use source::{IterSource, JsonlReplayer, Message, MessageSource, ReplayConfig, SourceError};
pub use stats::{create_shared_stats, PipelineStats, SharedPipelineStats, StatsSnapshot};

// Gateway re-exports (when enabled)
#[cfg(feature = "gateway")]
pub use gateway::{BlockingGatewayClient, GatewayClient, GatewayConfig, GatewayError, GatewaySink};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
