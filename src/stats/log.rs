//! Atomic pipeline counters with optional persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for the current run.
#[derive(Debug)]
pub struct PipelineStats {
    /// Messages pulled from the source
    messages_received: AtomicU64,
    /// Payloads that failed to decode
    decode_failures: AtomicU64,
    /// Payloads missing derivation inputs
    derivation_failures: AtomicU64,
    /// Records older than the horizon
    stale_records: AtomicU64,
    /// Records accepted into the window
    records_upserted: AtomicU64,
    /// Records dropped by horizon advancement
    records_evicted: AtomicU64,
    /// Snapshots handed to the publisher
    snapshots_published: AtomicU64,
    /// Snapshots replaced by a newer one before rendering
    snapshots_coalesced: AtomicU64,
    /// Sink render failures
    sink_failures: AtomicU64,
    /// Run start time
    started_at: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            derivation_failures: AtomicU64::new(0),
            stale_records: AtomicU64::new(0),
            records_upserted: AtomicU64::new(0),
            records_evicted: AtomicU64::new(0),
            snapshots_published: AtomicU64::new(0),
            snapshots_coalesced: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Create stats that continue counting from a previous run's file.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!("Could not load previous pipeline stats: {e}");
        }

        stats
    }

    pub fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_derivation_failure(&self) {
        self.derivation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale(&self) {
        self.stale_records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upsert(&self, evicted: usize) {
        self.records_upserted.fetch_add(1, Ordering::Relaxed);
        self.records_evicted
            .fetch_add(evicted as u64, Ordering::Relaxed);
    }

    pub fn record_published(&self) {
        self.snapshots_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced(&self) {
        self.snapshots_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            derivation_failures: self.derivation_failures.load(Ordering::Relaxed),
            stale_records: self.stale_records.load(Ordering::Relaxed),
            records_upserted: self.records_upserted.load(Ordering::Relaxed),
            records_evicted: self.records_evicted.load(Ordering::Relaxed),
            snapshots_published: self.snapshots_published.load(Ordering::Relaxed),
            snapshots_coalesced: self.snapshots_coalesced.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            started_at: self.started_at,
            run_duration_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Pipeline Statistics:\n\
             - Messages received: {}\n\
             - Decode failures: {}\n\
             - Derivation failures: {}\n\
             - Stale records skipped: {}\n\
             - Records upserted: {}\n\
             - Records evicted: {}\n\
             - Snapshots published: {}\n\
             - Snapshots coalesced: {}\n\
             - Sink failures: {}\n\
             - Run duration: {} seconds",
            stats.messages_received,
            stats.decode_failures,
            stats.derivation_failures,
            stats.stale_records,
            stats.records_upserted,
            stats.records_evicted,
            stats.snapshots_published,
            stats.snapshots_coalesced,
            stats.sink_failures,
            stats.run_duration_secs
        )
    }

    /// Save counters to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.snapshot();
            let persisted = PersistedStats {
                messages_received: stats.messages_received,
                decode_failures: stats.decode_failures,
                derivation_failures: stats.derivation_failures,
                stale_records: stats.stale_records,
                records_upserted: stats.records_upserted,
                records_evicted: stats.records_evicted,
                snapshots_published: stats.snapshots_published,
                snapshots_coalesced: stats.snapshots_coalesced,
                sink_failures: stats.sink_failures,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.messages_received
                    .store(persisted.messages_received, Ordering::Relaxed);
                self.decode_failures
                    .store(persisted.decode_failures, Ordering::Relaxed);
                self.derivation_failures
                    .store(persisted.derivation_failures, Ordering::Relaxed);
                self.stale_records
                    .store(persisted.stale_records, Ordering::Relaxed);
                self.records_upserted
                    .store(persisted.records_upserted, Ordering::Relaxed);
                self.records_evicted
                    .store(persisted.records_evicted, Ordering::Relaxed);
                self.snapshots_published
                    .store(persisted.snapshots_published, Ordering::Relaxed);
                self.snapshots_coalesced
                    .store(persisted.snapshots_coalesced, Ordering::Relaxed);
                self.sink_failures
                    .store(persisted.sink_failures, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        for counter in [
            &self.messages_received,
            &self.decode_failures,
            &self.derivation_failures,
            &self.stale_records,
            &self.records_upserted,
            &self.records_evicted,
            &self.snapshots_published,
            &self.snapshots_coalesced,
            &self.sink_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub messages_received: u64,
    pub decode_failures: u64,
    pub derivation_failures: u64,
    pub stale_records: u64,
    pub records_upserted: u64,
    pub records_evicted: u64,
    pub snapshots_published: u64,
    pub snapshots_coalesced: u64,
    pub sink_failures: u64,
    pub started_at: DateTime<Utc>,
    pub run_duration_secs: u64,
}

impl StatsSnapshot {
    /// Messages discarded before reaching the window.
    pub fn rejected(&self) -> u64 {
        self.decode_failures + self.derivation_failures
    }
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    messages_received: u64,
    decode_failures: u64,
    derivation_failures: u64,
    #[serde(default)]
    stale_records: u64,
    records_upserted: u64,
    records_evicted: u64,
    snapshots_published: u64,
    #[serde(default)]
    snapshots_coalesced: u64,
    sink_failures: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared stats.
pub type SharedPipelineStats = Arc<PipelineStats>;

pub fn create_shared_stats() -> SharedPipelineStats {
    Arc::new(PipelineStats::new())
}

pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedPipelineStats {
    Arc::new(PipelineStats::with_persistence(path))
}
