//! The aggregation engine: decode, derive, upsert, publish.
//!
//! One engine consumes one ordered stream. It is the only writer of its
//! [`WindowStore`], and every publish happens after the upsert of the same
//! message and before the next message is looked at.

use crate::config::{ConfigError, EngineConfig};
use crate::core::{
    decode, derive_record, payload_excerpt, DailyRecord, DecodeError, DerivationError, Snapshot,
    UpsertOutcome, WindowStore,
};
use crate::publish::{PublishOutcome, SnapshotPublisher};
use crate::source::{MessageSource, SourceError};
use crate::stats::SharedPipelineStats;
use chrono::NaiveDate;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// How long `run` waits on the source before re-checking the stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Why a message never reached the window.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestError {
    Decode(DecodeError),
    Derivation(DerivationError),
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::Decode(e) => write!(f, "decode failed: {e}"),
            IngestError::Derivation(e) => write!(f, "derivation failed: {e}"),
        }
    }
}

impl std::error::Error for IngestError {}

impl From<DecodeError> for IngestError {
    fn from(e: DecodeError) -> Self {
        IngestError::Decode(e)
    }
}

impl From<DerivationError> for IngestError {
    fn from(e: DerivationError) -> Self {
        IngestError::Derivation(e)
    }
}

/// Result of handling one message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    /// Record applied and a snapshot published
    Applied {
        record: DailyRecord,
        upsert: UpsertOutcome,
        evicted: usize,
        publish: PublishOutcome,
    },
    /// Record fell outside the horizon; nothing changed
    Stale { date: NaiveDate },
    /// Message discarded
    Rejected(IngestError),
}

impl MessageOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, MessageOutcome::Applied { .. })
    }
}

/// Why `run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The source ended
    SourceExhausted,
    /// The stop flag was cleared
    Cancelled,
    /// `max_messages` were handled
    LimitReached,
}

/// Totals for one call to `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub messages: u64,
    pub applied: u64,
    pub stale: u64,
    pub rejected: u64,
    pub stop_reason: StopReason,
}

/// Consumes messages and keeps the rolling window current.
pub struct AggregationEngine {
    config: EngineConfig,
    store: WindowStore,
    publisher: SnapshotPublisher,
    stats: SharedPipelineStats,
    instance_id: Uuid,
    sequence: u64,
}

impl AggregationEngine {
    /// Build an engine around a fresh, empty window sized from `config`.
    pub fn new(
        config: EngineConfig,
        publisher: SnapshotPublisher,
        stats: SharedPipelineStats,
    ) -> Result<Self, ConfigError> {
        let store = WindowStore::new(config.horizon_days);
        Self::with_store(config, store, publisher, stats)
    }

    /// Build an engine that takes ownership of an existing window.
    pub fn with_store(
        config: EngineConfig,
        store: WindowStore,
        publisher: SnapshotPublisher,
        stats: SharedPipelineStats,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if store.horizon_days() != config.horizon_days {
            return Err(ConfigError::Invalid(format!(
                "window horizon {} does not match configured horizon {}",
                store.horizon_days(),
                config.horizon_days
            )));
        }

        let instance_id = Uuid::new_v4();
        tracing::info!(
            %instance_id,
            horizon_days = config.horizon_days,
            date_field = %config.fields.date,
            "Aggregation engine ready"
        );

        Ok(Self {
            config,
            store,
            publisher,
            stats,
            instance_id,
            sequence: 0,
        })
    }

    /// Handle one inbound payload. Never fails; rejections are logged and returned.
    pub fn on_message(&mut self, payload: &[u8]) -> MessageOutcome {
        self.stats.record_message();

        let record = match self.ingest(payload) {
            Ok(record) => record,
            Err(error) => {
                match error {
                    IngestError::Decode(_) => self.stats.record_decode_failure(),
                    IngestError::Derivation(_) => self.stats.record_derivation_failure(),
                }
                tracing::warn!(
                    payload = %payload_excerpt(payload),
                    "Discarding message: {error}"
                );
                return MessageOutcome::Rejected(error);
            }
        };

        let result = self.store.upsert(record);
        if result.outcome == UpsertOutcome::Stale {
            self.stats.record_stale();
            tracing::debug!(
                date = %record.date,
                latest = ?self.store.latest_date(),
                "Skipping record older than the window horizon"
            );
            return MessageOutcome::Stale { date: record.date };
        }

        self.stats.record_upsert(result.evicted);
        tracing::debug!(
            date = %record.date,
            outcome = ?result.outcome,
            evicted = result.evicted,
            window_len = self.store.len(),
            "Window updated"
        );

        self.sequence += 1;
        let publish = self
            .publisher
            .publish(self.store.snapshot().with_sequence(self.sequence));

        MessageOutcome::Applied {
            record,
            upsert: result.outcome,
            evicted: result.evicted,
            publish,
        }
    }

    /// Pull and handle messages until the source ends, `running` is cleared,
    /// or `max_messages` have been handled.
    ///
    /// Waiting on the source is the only blocking point. A message already
    /// pulled is always handled to completion before the flag is re-checked.
    pub fn run<S: MessageSource + ?Sized>(
        &mut self,
        source: &mut S,
        running: &AtomicBool,
        max_messages: Option<u64>,
    ) -> Result<RunSummary, SourceError> {
        let mut summary = RunSummary {
            messages: 0,
            applied: 0,
            stale: 0,
            rejected: 0,
            stop_reason: StopReason::Cancelled,
        };

        loop {
            if !running.load(Ordering::SeqCst) {
                summary.stop_reason = StopReason::Cancelled;
                break;
            }
            if max_messages.is_some_and(|limit| summary.messages >= limit) {
                summary.stop_reason = StopReason::LimitReached;
                break;
            }

            let message = match source.recv_timeout(POLL_INTERVAL) {
                Ok(message) => message,
                Err(SourceError::Timeout) => continue,
                Err(SourceError::Disconnected) => {
                    summary.stop_reason = StopReason::SourceExhausted;
                    break;
                }
                Err(e) => return Err(e),
            };

            tracing::trace!(offset = message.offset, "Received message");
            summary.messages += 1;
            match self.on_message(&message.payload) {
                MessageOutcome::Applied { .. } => summary.applied += 1,
                MessageOutcome::Stale { .. } => summary.stale += 1,
                MessageOutcome::Rejected(_) => summary.rejected += 1,
            }
        }

        tracing::info!(
            messages = summary.messages,
            applied = summary.applied,
            rejected = summary.rejected,
            reason = ?summary.stop_reason,
            "Consume loop finished"
        );
        Ok(summary)
    }

    /// Current window contents without publishing.
    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot().with_sequence(self.sequence)
    }

    pub fn window(&self) -> &WindowStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> &SharedPipelineStats {
        &self.stats
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Stop the publisher, letting its render thread drain.
    pub fn shutdown(&mut self) {
        self.publisher.shutdown();
    }

    fn ingest(&self, payload: &[u8]) -> Result<DailyRecord, IngestError> {
        let source = decode(payload, &self.config.fields)?;
        let record = derive_record(&source, &self.config.fields.high_intensity_label)?;
        Ok(record)
    }
}
