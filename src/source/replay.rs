//! JSON-lines replay of a daily-activity export.
//!
//! Each non-blank line becomes one message, byte for byte. Lines are not
//! validated here; malformed ones are the engine's problem, exactly as they
//! would be coming off a real topic.

use crate::source::channel::{channel_source, ChannelSource, MessageSender};
use crate::source::types::{Message, SourceError};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Settings for a replay run.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// JSON-lines file to read
    pub path: PathBuf,
    /// Delay between consecutive messages
    pub interval: Duration,
    /// Start over from the first line after reaching the end
    pub repeat: bool,
    /// Channel capacity between the reader thread and the consumer
    pub capacity: usize,
}

impl ReplayConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            interval: Duration::ZERO,
            repeat: false,
            capacity: 64,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }
}

/// Counters reported when the reader thread finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub messages_sent: u64,
    pub passes: u64,
}

/// Handle to a running reader thread.
pub struct ReplayHandle {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<ReplayStats, SourceError>>>,
}

impl ReplayHandle {
    /// Ask the reader to stop after its current line.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Wait for the reader thread to finish.
    pub fn join(mut self) -> Result<ReplayStats, SourceError> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| SourceError::Io("replay thread panicked".to_string()))?,
            None => Ok(ReplayStats::default()),
        }
    }
}

/// Spawns a reader thread that feeds a [`ChannelSource`].
pub struct JsonlReplayer;

impl JsonlReplayer {
    /// Start replaying `config.path`; the returned source yields its lines in order.
    pub fn start(config: ReplayConfig) -> Result<(ChannelSource, ReplayHandle), SourceError> {
        // Fail fast on a missing file instead of from inside the thread.
        File::open(&config.path)
            .map_err(|e| SourceError::Io(format!("{}: {e}", config.path.display())))?;

        let (sender, source) = channel_source(config.capacity.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();

        let handle = thread::Builder::new()
            .name("jsonl-replay".to_string())
            .spawn(move || replay_loop(&config, &sender, &thread_stop))
            .map_err(|e| SourceError::Io(e.to_string()))?;

        Ok((
            source,
            ReplayHandle {
                stop,
                handle: Some(handle),
            },
        ))
    }
}

fn replay_loop(
    config: &ReplayConfig,
    sender: &MessageSender,
    stop: &AtomicBool,
) -> Result<ReplayStats, SourceError> {
    let mut stats = ReplayStats::default();
    let mut offset = 0u64;

    loop {
        tracing::info!(path = %config.path.display(), pass = stats.passes + 1, "Replaying data file");
        let file = File::open(&config.path)
            .map_err(|e| SourceError::Io(format!("{}: {e}", config.path.display())))?;
        let mut sent_this_pass = 0u64;

        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();
        let mut line_number = 0usize;

        loop {
            if stop.load(Ordering::SeqCst) {
                return Ok(stats);
            }

            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .map_err(|e| SourceError::Io(e.to_string()))?;
            if read == 0 {
                break;
            }
            line_number += 1;

            let payload = strip_line_terminator(&buf);
            if payload.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            if sent_this_pass > 0 && !config.interval.is_zero() {
                thread::sleep(config.interval);
            }

            tracing::debug!(line = line_number, offset, "Sending replayed message");
            if !sender.send(Message::new(offset, payload)) {
                // Consumer went away; nothing left to feed.
                return Ok(stats);
            }
            offset += 1;
            sent_this_pass += 1;
            stats.messages_sent += 1;
        }

        stats.passes += 1;
        // An empty file would otherwise spin forever in repeat mode.
        if !config.repeat || sent_this_pass == 0 {
            return Ok(stats);
        }
    }
}

/// Drop a trailing `\n` or `\r\n`; everything else is passed on untouched.
fn strip_line_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
