//! Built-in snapshot sinks.

use crate::core::Snapshot;
use crate::publish::{SinkError, SnapshotSink};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Width of the longest calorie bar in characters.
const BAR_WIDTH: usize = 40;

/// Text chart: one calorie bar per day with the high-activity minutes alongside.
pub struct ConsoleChartSink<W: Write + Send> {
    out: W,
    bar_width: usize,
}

impl ConsoleChartSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> ConsoleChartSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            bar_width: BAR_WIDTH,
        }
    }

    pub fn with_bar_width(mut self, bar_width: usize) -> Self {
        self.bar_width = bar_width.max(1);
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn bar(&self, value: f64, max: f64) -> String {
        if max <= 0.0 {
            return String::new();
        }
        let filled = ((value / max) * self.bar_width as f64).round() as usize;
        "#".repeat(filled.min(self.bar_width))
    }
}

impl<W: Write + Send> SnapshotSink for ConsoleChartSink<W> {
    fn name(&self) -> &str {
        "console"
    }

    fn render(&mut self, snapshot: &Snapshot) -> Result<(), SinkError> {
        let max = snapshot.total_calories_series().fold(0.0, f64::max);
        let mut chart = String::new();

        chart.push_str(&format!(
            "\nCalories burned by day with high activity time (#{}, {} of {} days)\n",
            snapshot.sequence,
            snapshot.len(),
            snapshot.horizon_days
        ));
        for point in &snapshot.points {
            chart.push_str(&format!(
                "{}  {:<width$} {:>6.0} kcal  {:>5.0} min\n",
                point.date.format("%Y-%m-%d"),
                self.bar(point.total_calories, max),
                point.total_calories,
                point.high_activity_minutes,
                width = self.bar_width
            ));
        }

        let summary = snapshot.summary();
        if let Some(mean) = summary.mean_total_calories {
            chart.push_str(&format!(
                "{:.0} kcal in window (mean {:.0}/day), {:.0} high-activity minutes\n",
                summary.total_calories_sum, mean, summary.high_activity_minutes_sum
            ));
        }

        self.out.write_all(chart.as_bytes())?;
        self.out.flush()?;
        Ok(())
    }
}

/// Appends every snapshot as one JSON line.
pub struct JsonlExportSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlExportSink {
    /// Open (or create) `path` for appending.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotSink for JsonlExportSink {
    fn name(&self) -> &str {
        "jsonl-export"
    }

    fn render(&mut self, snapshot: &Snapshot) -> Result<(), SinkError> {
        let line =
            serde_json::to_string(snapshot).map_err(|e| SinkError::Serialization(e.to_string()))?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Shared cell holding the most recently rendered snapshot.
///
/// Clones share the same cell, so one clone can be the sink while another is read.
#[derive(Debug, Clone, Default)]
pub struct LatestSnapshot {
    inner: Arc<RwLock<Option<Snapshot>>>,
}

impl LatestSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the latest snapshot, if any has been rendered.
    pub fn get(&self) -> Option<Snapshot> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl SnapshotSink for LatestSnapshot {
    fn name(&self) -> &str {
        "latest"
    }

    fn render(&mut self, snapshot: &Snapshot) -> Result<(), SinkError> {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(snapshot.clone());
        Ok(())
    }
}

/// Renders to several sinks; one failing sink does not skip the others.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn SnapshotSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl SnapshotSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn push(&mut self, sink: Box<dyn SnapshotSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl SnapshotSink for FanoutSink {
    fn name(&self) -> &str {
        "fanout"
    }

    fn render(&mut self, snapshot: &Snapshot) -> Result<(), SinkError> {
        let mut failures = Vec::new();
        for sink in &mut self.sinks {
            if let Err(e) = sink.render(snapshot) {
                failures.push(format!("{}: {e}", sink.name()));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SinkError::Rejected(failures.join("; ")))
        }
    }
}
