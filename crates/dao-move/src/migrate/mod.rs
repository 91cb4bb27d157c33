//! Migrator protocol: the capability a storage declares to move its data between
//! two DAOs, and the status stream it reports progress on.

mod copier;

pub use copier::RecordCopier;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::dao::Dao;
use crate::error::Result;

/// Entity type name → number of entities copied.
pub type MigrationCounts = BTreeMap<String, u64>;

/// Progress snapshot emitted by a migrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MigratorStatus {
    /// Entities processed so far.
    pub count: u64,
    /// Expected entities; 0 means unknown.
    pub total: u64,
}

impl MigratorStatus {
    pub fn new(count: u64, total: u64) -> Self {
        Self { count, total }
    }

    /// Completion percentage, `None` when the total is unknown.
    pub fn percent(&self) -> Option<f64> {
        (self.total > 0).then(|| (self.count.min(self.total) as f64 / self.total as f64) * 100.0)
    }
}

/// Data-moving capability of a storage.
///
/// Reads from `source`, writes to `target` unless `dry_run`, emits statuses on
/// `status` and returns per-entity counts. Implementations should not write when
/// `dry_run` is set; the target is additionally opened read-only in that case.
#[async_trait]
pub trait Migrator: Send + Sync {
    async fn migrate(
        &self,
        source: &dyn Dao,
        target: &dyn Dao,
        dry_run: bool,
        status: StatusSender,
    ) -> Result<MigrationCounts>;
}

/// Producer side of the bounded status channel.
///
/// Sending never blocks once the consumer is gone: the update is dropped and
/// `report` returns `false`. Counts lower than one already sent are raised to it,
/// so the consumer observes a non-decreasing sequence.
#[derive(Debug, Clone)]
pub struct StatusSender {
    tx: mpsc::Sender<MigratorStatus>,
    high_water: Arc<AtomicU64>,
}

impl StatusSender {
    pub fn new(tx: mpsc::Sender<MigratorStatus>) -> Self {
        Self {
            tx,
            high_water: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create a bounded status channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<MigratorStatus>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    fn clamp(&self, mut status: MigratorStatus) -> MigratorStatus {
        let previous = self.high_water.fetch_max(status.count, Ordering::AcqRel);
        if status.count < previous {
            warn!(
                "Status count went backwards ({} < {}), clamping",
                status.count, previous
            );
            status.count = previous;
        }
        status
    }

    /// Send a status, waiting for buffer space. Returns whether it was delivered.
    pub async fn report(&self, status: MigratorStatus) -> bool {
        let status = self.clamp(status);
        self.tx.send(status).await.is_ok()
    }

    /// Send a status without waiting; dropped if the buffer is full or closed.
    pub fn try_report(&self, status: MigratorStatus) -> bool {
        let status = self.clamp(status);
        self.tx.try_send(status).is_ok()
    }

    /// Whether the consumer has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
