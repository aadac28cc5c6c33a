//! Pipeline statistics.
//!
//! Counters describing what the consumer did with each message, shared
//! between the engine, the publisher thread and any HTTP handlers.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_stats, create_shared_stats_with_persistence, PipelineStats, SharedPipelineStats,
    StatsSnapshot,
};
