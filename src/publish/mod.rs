//! Snapshot publication to rendering sinks.
//!
//! Publishing is fire-and-forget for the engine: sink failures are logged and
//! counted here and never travel back up the consume loop.

pub mod sinks;

pub use sinks::{ConsoleChartSink, FanoutSink, JsonlExportSink, LatestSnapshot};

use crate::core::Snapshot;
use crate::stats::SharedPipelineStats;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use std::thread::{self, JoinHandle};

/// A consumer of window snapshots (chart, file, remote renderer).
pub trait SnapshotSink: Send {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    fn render(&mut self, snapshot: &Snapshot) -> Result<(), SinkError>;
}

impl<S: SnapshotSink + ?Sized> SnapshotSink for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn render(&mut self, snapshot: &Snapshot) -> Result<(), SinkError> {
        (**self).render(snapshot)
    }
}

/// Rendering or delivery failure inside a sink.
#[derive(Debug)]
pub enum SinkError {
    Io(String),
    Serialization(String),
    Rejected(String),
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Io(e) => write!(f, "Sink IO error: {e}"),
            SinkError::Serialization(e) => write!(f, "Sink serialization error: {e}"),
            SinkError::Rejected(e) => write!(f, "Sink rejected snapshot: {e}"),
        }
    }
}

impl std::error::Error for SinkError {}

impl From<std::io::Error> for SinkError {
    fn from(e: std::io::Error) -> Self {
        SinkError::Io(e.to_string())
    }
}

/// What happened to a published snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Rendered synchronously
    Rendered,
    /// Sink failed; snapshot dropped
    SinkFailed,
    /// Queued for the render thread
    Queued,
    /// Queued after displacing an older, unrendered snapshot
    Coalesced,
    /// Render thread is gone; snapshot dropped
    Dropped,
}

enum Mode {
    Inline(Box<dyn SnapshotSink>),
    Background {
        sender: Option<Sender<Snapshot>>,
        // Second receiver on the same queue, used only to discard a stale entry.
        displaced: Receiver<Snapshot>,
        worker: Option<JoinHandle<()>>,
    },
}

/// Forwards snapshots to a sink, either inline or on a dedicated thread.
pub struct SnapshotPublisher {
    mode: Mode,
    stats: SharedPipelineStats,
}

impl SnapshotPublisher {
    /// Render on the caller's thread. Publish returns after the sink has run.
    pub fn inline(sink: impl SnapshotSink + 'static, stats: SharedPipelineStats) -> Self {
        Self {
            mode: Mode::Inline(Box::new(sink)),
            stats,
        }
    }

    /// Render on a dedicated thread fed by a single-slot queue.
    ///
    /// If the sink is still busy when a newer snapshot arrives, the queued one
    /// is replaced, so only the latest snapshot is guaranteed to be rendered.
    pub fn background(sink: impl SnapshotSink + 'static, stats: SharedPipelineStats) -> Self {
        let (sender, receiver) = bounded::<Snapshot>(1);
        let displaced = receiver.clone();
        let worker_stats = stats.clone();
        let mut sink = sink;

        let worker = thread::Builder::new()
            .name("snapshot-render".to_string())
            .spawn(move || {
                for snapshot in receiver.iter() {
                    render_guarded(&mut sink, &snapshot, &worker_stats);
                }
                tracing::debug!("Snapshot render thread exiting");
            });

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!("Could not start snapshot render thread: {e}");
                None
            }
        };

        Self {
            mode: Mode::Background {
                sender: worker.as_ref().map(|_| sender),
                displaced,
                worker,
            },
            stats,
        }
    }

    /// Hand a snapshot to the sink. Never fails from the caller's point of view.
    pub fn publish(&mut self, snapshot: Snapshot) -> PublishOutcome {
        self.stats.record_published();

        match &mut self.mode {
            Mode::Inline(sink) => {
                if render_guarded(sink, &snapshot, &self.stats) {
                    PublishOutcome::Rendered
                } else {
                    PublishOutcome::SinkFailed
                }
            }
            Mode::Background {
                sender,
                displaced,
                worker,
            } => {
                // The displaced receiver keeps the queue connected, so a dead
                // render thread has to be noticed here.
                if worker.as_ref().map_or(true, JoinHandle::is_finished) {
                    if sender.take().is_some() {
                        tracing::error!("Snapshot render thread stopped; dropping further snapshots");
                    }
                    if let Some(handle) = worker.take() {
                        if handle.join().is_err() {
                            tracing::error!("Snapshot render thread panicked");
                        }
                    }
                    return PublishOutcome::Dropped;
                }
                let Some(sender) = sender.as_ref() else {
                    return PublishOutcome::Dropped;
                };
                queue_latest(sender, displaced, snapshot, &self.stats)
            }
        }
    }

    /// Stop the render thread after it drains the queued snapshot.
    pub fn shutdown(&mut self) {
        if let Mode::Background { sender, worker, .. } = &mut self.mode {
            sender.take();
            if let Some(handle) = worker.take() {
                if handle.join().is_err() {
                    tracing::error!("Snapshot render thread panicked");
                }
            }
        }
    }
}

impl Drop for SnapshotPublisher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn queue_latest(
    sender: &Sender<Snapshot>,
    displaced: &Receiver<Snapshot>,
    snapshot: Snapshot,
    stats: &SharedPipelineStats,
) -> PublishOutcome {
    let snapshot = match sender.try_send(snapshot) {
        Ok(()) => return PublishOutcome::Queued,
        Err(TrySendError::Disconnected(_)) => return PublishOutcome::Dropped,
        Err(TrySendError::Full(snapshot)) => snapshot,
    };

    // The render thread is busy; replace whatever is still waiting.
    let coalesced = match displaced.try_recv() {
        Ok(stale) => {
            tracing::debug!(sequence = stale.sequence, "Coalescing unrendered snapshot");
            stats.record_coalesced();
            true
        }
        Err(TryRecvError::Empty) => false,
        Err(TryRecvError::Disconnected) => return PublishOutcome::Dropped,
    };

    // Only this thread sends, so the slot can only have been freed, never refilled.
    match sender.try_send(snapshot) {
        Ok(()) if coalesced => PublishOutcome::Coalesced,
        Ok(()) => PublishOutcome::Queued,
        Err(_) => PublishOutcome::Dropped,
    }
}

/// Render and contain any failure. Returns whether the sink succeeded.
fn render_guarded<S: SnapshotSink + ?Sized>(
    sink: &mut S,
    snapshot: &Snapshot,
    stats: &SharedPipelineStats,
) -> bool {
    match sink.render(snapshot) {
        Ok(()) => true,
        Err(e) => {
            stats.record_sink_failure();
            tracing::warn!(
                sink = sink.name(),
                sequence = snapshot.sequence,
                "Dropping snapshot after sink failure: {e}"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::create_shared_stats;
    use std::sync::{Arc, Mutex};

    struct FailingSink;

    impl SnapshotSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        fn render(&mut self, _snapshot: &Snapshot) -> Result<(), SinkError> {
            Err(SinkError::Rejected("renderer offline".to_string()))
        }
    }

    /// Records sequences; optionally blocks until released.
    struct GatedSink {
        seen: Arc<Mutex<Vec<u64>>>,
        gate: Option<crossbeam_channel::Receiver<()>>,
    }

    impl SnapshotSink for GatedSink {
        fn name(&self) -> &str {
            "gated"
        }

        fn render(&mut self, snapshot: &Snapshot) -> Result<(), SinkError> {
            if let Some(gate) = &self.gate {
                let _ = gate.recv();
            }
            self.seen.lock().unwrap().push(snapshot.sequence);
            Ok(())
        }
    }

    fn snapshot(sequence: u64) -> Snapshot {
        Snapshot::new(Vec::new(), None, 15).with_sequence(sequence)
    }

    #[test]
    fn test_inline_sink_failure_is_contained() {
        let stats = create_shared_stats();
        let mut publisher = SnapshotPublisher::inline(FailingSink, stats.clone());

        assert_eq!(publisher.publish(snapshot(1)), PublishOutcome::SinkFailed);
        assert_eq!(publisher.publish(snapshot(2)), PublishOutcome::SinkFailed);

        let counts = stats.snapshot();
        assert_eq!(counts.snapshots_published, 2);
        assert_eq!(counts.sink_failures, 2);
    }

    #[test]
    fn test_inline_renders_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = GatedSink {
            seen: seen.clone(),
            gate: None,
        };
        let mut publisher = SnapshotPublisher::inline(sink, create_shared_stats());
        for sequence in 1..=3 {
            assert_eq!(publisher.publish(snapshot(sequence)), PublishOutcome::Rendered);
        }
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_background_coalesces_to_latest() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (release, gate) = crossbeam_channel::unbounded();
        let sink = GatedSink {
            seen: seen.clone(),
            gate: Some(gate),
        };
        let stats = create_shared_stats();
        let mut publisher = SnapshotPublisher::background(sink, stats.clone());

        // First snapshot is taken by the worker, which then blocks on the gate.
        publisher.publish(snapshot(1));
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while let Mode::Background { displaced, .. } = &publisher.mode {
            if displaced.is_empty() || std::time::Instant::now() > deadline {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        publisher.publish(snapshot(2));
        publisher.publish(snapshot(3));
        publisher.publish(snapshot(4));

        for _ in 0..4 {
            let _ = release.send(());
        }
        publisher.shutdown();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.first(), Some(&1));
        assert_eq!(seen.last(), Some(&4));
        assert!(seen.len() <= 3);
        assert!(stats.snapshot().snapshots_coalesced >= 1);
    }

    #[test]
    fn test_background_reports_dead_render_thread() {
        struct PanickingSink;

        impl SnapshotSink for PanickingSink {
            fn name(&self) -> &str {
                "panicking"
            }

            fn render(&mut self, _snapshot: &Snapshot) -> Result<(), SinkError> {
                panic!("renderer crashed");
            }
        }

        let mut publisher = SnapshotPublisher::background(PanickingSink, create_shared_stats());
        assert_eq!(publisher.publish(snapshot(1)), PublishOutcome::Queued);

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while let Mode::Background {
            worker: Some(handle),
            ..
        } = &publisher.mode
        {
            if handle.is_finished() || std::time::Instant::now() > deadline {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        assert_eq!(publisher.publish(snapshot(2)), PublishOutcome::Dropped);
        assert_eq!(publisher.publish(snapshot(3)), PublishOutcome::Dropped);
    }

    #[test]
    fn test_background_failure_does_not_stop_worker() {
        let stats = create_shared_stats();
        let mut publisher = SnapshotPublisher::background(FailingSink, stats.clone());
        publisher.publish(snapshot(1));
        publisher.shutdown();
        assert_eq!(stats.snapshot().sink_failures, 1);
        assert_eq!(publisher.publish(snapshot(2)), PublishOutcome::Dropped);
    }
}
