//! Progress consumer: drains the status channel and renders it.
//!
//! The consumer runs as its own task, spawned before the migrator starts and
//! joined after the sender side is dropped. It shares no lock with the
//! orchestrator and stops as soon as the channel closes.

use std::io::Write;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::ProgressMode;
use crate::migrate::MigratorStatus;

/// What the consumer observed once the channel closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSummary {
    /// Statuses received.
    pub updates: u64,
    /// Last status received, if any.
    pub last: Option<MigratorStatus>,
}

/// Rendering target for progress.
pub trait ProgressSink: Send {
    /// Called once, with the first known total.
    fn start(&mut self, total: u64);

    /// Called whenever the indicator moves.
    fn update(&mut self, position: u64, total: u64);

    /// Called once after the channel closed.
    fn finish(&mut self, summary: &ProgressSummary);
}

/// Build the sink for a progress mode.
pub fn sink_for(mode: ProgressMode) -> Box<dyn ProgressSink> {
    match mode {
        ProgressMode::Log => Box::new(LogProgress::default()),
        ProgressMode::Json => Box::new(JsonProgress::stderr()),
        ProgressMode::None => Box::new(NoProgress),
    }
}

/// Monotonic position against a fixed total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressIndicator {
    position: u64,
    total: u64,
}

impl ProgressIndicator {
    pub fn new(total: u64) -> Self {
        Self { position: 0, total }
    }

    /// Move forward to `count`. Returns false if that would not advance.
    pub fn advance_to(&mut self, count: u64) -> bool {
        if count <= self.position {
            return false;
        }
        self.position = count;
        true
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

/// Drain `rx` until it closes, rendering through `sink`.
///
/// The indicator is created lazily on the first status with a known total;
/// statuses with `total == 0` are counted but not rendered.
pub async fn consume(
    mut rx: mpsc::Receiver<MigratorStatus>,
    mut sink: Box<dyn ProgressSink>,
) -> ProgressSummary {
    let mut summary = ProgressSummary::default();
    let mut indicator: Option<ProgressIndicator> = None;

    while let Some(status) = rx.recv().await {
        summary.updates += 1;
        summary.last = Some(status);

        if status.total == 0 {
            continue;
        }

        if indicator.is_none() {
            sink.start(status.total);
        }
        let bar = indicator.get_or_insert_with(|| ProgressIndicator::new(status.total));
        if bar.advance_to(status.count) {
            sink.update(bar.position(), bar.total());
        }
    }

    sink.finish(&summary);
    summary
}

/// Spawn [`consume`] as its own task.
pub fn spawn_consumer(
    rx: mpsc::Receiver<MigratorStatus>,
    sink: Box<dyn ProgressSink>,
) -> JoinHandle<ProgressSummary> {
    tokio::spawn(consume(rx, sink))
}

/// Logs percentage milestones through tracing.
#[derive(Debug, Default)]
pub struct LogProgress {
    last_decile: Option<u64>,
}

impl ProgressSink for LogProgress {
    fn start(&mut self, total: u64) {
        info!("Migrating {} entities", total);
    }

    fn update(&mut self, position: u64, total: u64) {
        let decile = position.min(total) * 10 / total;
        if self.last_decile.map_or(true, |last| decile > last) {
            self.last_decile = Some(decile);
            info!("Progress: {}/{} ({}%)", position, total, decile * 10);
        }
    }

    fn finish(&mut self, summary: &ProgressSummary) {
        if let Some(last) = summary.last {
            info!("Copied {} entities ({} status updates)", last.count, summary.updates);
        }
    }
}

#[derive(Serialize)]
struct ProgressEvent<'a> {
    event: &'a str,
    count: u64,
    total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    percent: Option<f64>,
}

/// Writes one JSON object per event, one per line.
pub struct JsonProgress<W: Write + Send> {
    out: W,
}

impl JsonProgress<std::io::Stderr> {
    pub fn stderr() -> Self {
        Self {
            out: std::io::stderr(),
        }
    }
}

impl<W: Write + Send> JsonProgress<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, event: &ProgressEvent<'_>) {
        if let Ok(line) = serde_json::to_string(event) {
            // Progress output is best effort.
            let _ = writeln!(self.out, "{}", line);
        }
    }
}

impl<W: Write + Send> ProgressSink for JsonProgress<W> {
    fn start(&mut self, total: u64) {
        self.emit(&ProgressEvent {
            event: "start",
            count: 0,
            total,
            percent: Some(0.0),
        });
    }

    fn update(&mut self, position: u64, total: u64) {
        self.emit(&ProgressEvent {
            event: "progress",
            count: position,
            total,
            percent: MigratorStatus::new(position, total).percent(),
        });
    }

    fn finish(&mut self, summary: &ProgressSummary) {
        let last = summary.last.unwrap_or_default();
        self.emit(&ProgressEvent {
            event: "finish",
            count: last.count,
            total: last.total,
            percent: last.percent(),
        });
    }
}

/// Drains silently.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn start(&mut self, _total: u64) {}
    fn update(&mut self, _position: u64, _total: u64) {}
    fn finish(&mut self, _summary: &ProgressSummary) {}
}
