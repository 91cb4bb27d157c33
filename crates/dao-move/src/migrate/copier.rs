//! Generic migrator copying every record collection through the record capability.

use async_trait::async_trait;
use tracing::{debug, info};

use super::{MigrationCounts, Migrator, MigratorStatus, StatusSender};
use crate::dao::{Dao, RecordStore};
use crate::error::{DaoError, Result};

/// Default number of records between two status updates.
pub const DEFAULT_REPORT_EVERY: u64 = 100;

/// Copies every collection of the source into the target.
///
/// Counts first and reports `{0, total}`, then reports every `report_every`
/// records and once at the end. In dry run nothing is written but counts still
/// advance, so the report shows what a real run would copy.
#[derive(Debug, Clone)]
pub struct RecordCopier {
    report_every: u64,
}

impl RecordCopier {
    pub fn new() -> Self {
        Self {
            report_every: DEFAULT_REPORT_EVERY,
        }
    }

    /// Set the reporting interval (at least 1).
    pub fn with_report_every(mut self, report_every: u64) -> Self {
        self.report_every = report_every.max(1);
        self
    }
}

impl Default for RecordCopier {
    fn default() -> Self {
        Self::new()
    }
}

fn record_access<'a>(dao: &'a dyn Dao, side: &str) -> Result<&'a dyn RecordStore> {
    dao.records().ok_or_else(|| {
        DaoError::Migration(format!(
            "{} DAO ({}) does not support record access",
            side,
            dao.driver()
        ))
    })
}

#[async_trait]
impl Migrator for RecordCopier {
    async fn migrate(
        &self,
        source: &dyn Dao,
        target: &dyn Dao,
        dry_run: bool,
        status: StatusSender,
    ) -> Result<MigrationCounts> {
        let from = record_access(source, "source")?;
        let to = record_access(target, "target")?;

        let collections = from.collections().await?;
        let mut total = 0;
        for collection in &collections {
            total += from.count(collection).await?;
        }
        info!(
            "Copying {} records in {} collections{}",
            total,
            collections.len(),
            if dry_run { " (dry run)" } else { "" }
        );
        status.report(MigratorStatus::new(0, total)).await;

        let mut counts = MigrationCounts::new();
        let mut copied = 0u64;
        let mut reported = 0u64;
        for collection in collections {
            let records = from.scan(&collection).await?;
            let mut in_collection = 0u64;
            for record in &records {
                if !dry_run {
                    to.put(&collection, record).await?;
                }
                in_collection += 1;
                copied += 1;
                if copied % self.report_every == 0 {
                    status.report(MigratorStatus::new(copied, total)).await;
                    reported = copied;
                }
            }
            debug!("Copied {} records from {}", in_collection, collection);
            counts.insert(collection, in_collection);
        }

        if copied != reported {
            status.report(MigratorStatus::new(copied, total)).await;
        }

        Ok(counts)
    }
}
