//! Migration orchestrator - drives one storage migration from selection to report.
//!
//! The orchestrator is a linear state machine:
//!
//! ```text
//! Idle → ServiceSelected → SourceSelected → TargetSelected → Running → Completed | Failed
//! ```
//!
//! Nothing is retried and nothing is rolled back; a failed run leaves the target
//! partially populated.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{Config, ConfigFilters, DatabaseConfig, ProgressMode, ServiceConfig};
use crate::dao::{Dao, DaoOptions, DriverCatalog};
use crate::error::{DaoError, Result};
use crate::migrate::{MigrationCounts, StatusSender};
use crate::progress::{self, ProgressSink};
use crate::storage::{MigratableStorage, ServiceRegistry};

/// Default capacity of the status channel.
pub const DEFAULT_STATUS_BUFFER: usize = 1000;

/// Orchestrator phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    Idle,
    ServiceSelected,
    SourceSelected,
    TargetSelected,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationPhase::Idle => "idle",
            MigrationPhase::ServiceSelected => "service_selected",
            MigrationPhase::SourceSelected => "source_selected",
            MigrationPhase::TargetSelected => "target_selected",
            MigrationPhase::Running => "running",
            MigrationPhase::Completed => "completed",
            MigrationPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One side of a migration: driver identifier plus data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    pub driver: String,
    pub dsn: String,
}

impl DataSource {
    pub fn new(driver: impl Into<String>, dsn: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            dsn: dsn.into(),
        }
    }
}

impl From<&DatabaseConfig> for DataSource {
    fn from(db: &DatabaseConfig) -> Self {
        Self::new(&db.driver, &db.dsn)
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.driver, self.dsn)
    }
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    pub service: String,
    pub storage: String,
    pub source: DataSource,
    pub target: DataSource,

    /// Prefix both DAOs were opened with.
    pub prefix: String,

    pub dry_run: bool,

    /// Entity type → copied count.
    pub counts: MigrationCounts,

    /// Sum of all counts.
    pub total_copied: u64,

    /// Status updates observed by the progress consumer.
    pub status_updates: u64,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,

    /// Hash of the configuration the run was started from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
}

impl MigrationResult {
    /// Convert result to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Migration orchestrator.
pub struct Orchestrator {
    catalog: DriverCatalog,
    services: ServiceRegistry,
    service_configs: BTreeMap<String, ServiceConfig>,
    filters: ConfigFilters,
    status_buffer: usize,
    progress: ProgressMode,
    sink: Option<Box<dyn ProgressSink>>,
    config_hash: Option<String>,
    phase: MigrationPhase,
    selection: Option<MigratableStorage>,
    source: Option<DataSource>,
    target: Option<DataSource>,
}

impl Orchestrator {
    /// Create an orchestrator over an explicit driver catalog and service registry.
    pub fn new(catalog: DriverCatalog, services: ServiceRegistry) -> Self {
        Self {
            catalog,
            services,
            service_configs: BTreeMap::new(),
            filters: ConfigFilters::new(),
            status_buffer: DEFAULT_STATUS_BUFFER,
            progress: ProgressMode::Log,
            sink: None,
            config_hash: None,
            phase: MigrationPhase::Idle,
            selection: None,
            source: None,
            target: None,
        }
    }

    /// Create an orchestrator for the services and migration settings of a configuration.
    pub fn from_config(config: &Config, catalog: DriverCatalog) -> Self {
        let mut orchestrator = Self::new(catalog, ServiceRegistry::from_config(config))
            .with_status_buffer(config.migration.status_buffer)
            .with_progress(config.migration.progress);
        orchestrator.service_configs = config.services.clone();
        orchestrator.config_hash = Some(config.hash());
        orchestrator
    }

    /// Set the configuration a service's prefix is resolved from.
    pub fn with_service_config(mut self, service: impl Into<String>, config: ServiceConfig) -> Self {
        self.service_configs.insert(service.into(), config);
        self
    }

    /// Set the filter chain applied whenever a service configuration is read.
    pub fn with_filters(mut self, filters: ConfigFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Set the status channel capacity.
    pub fn with_status_buffer(mut self, capacity: usize) -> Self {
        self.status_buffer = capacity.max(1);
        self
    }

    /// Render progress with a built-in sink.
    pub fn with_progress(mut self, mode: ProgressMode) -> Self {
        self.progress = mode;
        self
    }

    /// Render progress of the next run through a custom sink.
    pub fn with_progress_sink(mut self, sink: Box<dyn ProgressSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn phase(&self) -> MigrationPhase {
        self.phase
    }

    pub fn catalog(&self) -> &DriverCatalog {
        &self.catalog
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    /// Every migratable (service, storage) pair.
    ///
    /// # Errors
    ///
    /// [`DaoError::NoMigratableServices`] if no declared storage has a migrator.
    pub fn migratable(&self) -> Result<Vec<MigratableStorage>> {
        let pairs = self.services.migratable();
        if pairs.is_empty() {
            return Err(DaoError::NoMigratableServices);
        }
        Ok(pairs)
    }

    fn expect_phase(&self, expected: MigrationPhase, action: &str) -> Result<()> {
        if self.phase != expected {
            return Err(DaoError::Config(format!(
                "cannot {} in phase {} (expected {})",
                action, self.phase, expected
            )));
        }
        Ok(())
    }

    /// Pick the storage to migrate.
    pub fn select(&mut self, service: &str, storage: &str) -> Result<()> {
        self.expect_phase(MigrationPhase::Idle, "select a storage")?;
        self.migratable()?;
        self.services.find(service, storage)?;

        self.selection = Some(MigratableStorage {
            service: service.to_string(),
            storage: storage.to_string(),
        });
        self.phase = MigrationPhase::ServiceSelected;
        info!("Selected {} ({})", service, storage);
        Ok(())
    }

    /// Pick the source. The driver must be registered.
    pub fn select_source(&mut self, source: DataSource) -> Result<()> {
        self.expect_phase(MigrationPhase::ServiceSelected, "select a source")?;
        self.catalog.require(&source.driver)?;
        info!("Source: {}", source);
        self.source = Some(source);
        self.phase = MigrationPhase::SourceSelected;
        Ok(())
    }

    /// Pick the target. The driver must be registered.
    pub fn select_target(&mut self, target: DataSource) -> Result<()> {
        self.expect_phase(MigrationPhase::SourceSelected, "select a target")?;
        self.catalog.require(&target.driver)?;
        info!("Target: {}", target);
        self.target = Some(target);
        self.phase = MigrationPhase::TargetSelected;
        Ok(())
    }

    /// Return to `Idle`, forgetting the current selections.
    pub fn reset(&mut self) {
        self.phase = MigrationPhase::Idle;
        self.selection = None;
        self.source = None;
        self.target = None;
    }

    /// Run the selected migration.
    ///
    /// Opens both DAOs with the storage's prefix (the source read-only and required
    /// to exist, the target read-only in dry run), runs the migrator while the
    /// progress consumer drains its statuses, then closes both DAOs whatever the
    /// outcome.
    pub async fn run(&mut self, dry_run: bool) -> Result<MigrationResult> {
        self.expect_phase(MigrationPhase::TargetSelected, "run")?;
        let (Some(selection), Some(source), Some(target)) = (
            self.selection.clone(),
            self.source.clone(),
            self.target.clone(),
        ) else {
            return Err(DaoError::Config("incomplete selection".into()));
        };

        self.phase = MigrationPhase::Running;
        let outcome = self.execute(&selection, &source, &target, dry_run).await;
        self.phase = match outcome {
            Ok(_) => MigrationPhase::Completed,
            Err(_) => MigrationPhase::Failed,
        };
        outcome
    }

    async fn execute(
        &mut self,
        selection: &MigratableStorage,
        source: &DataSource,
        target: &DataSource,
        dry_run: bool,
    ) -> Result<MigrationResult> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();

        let storage = self.services.find(&selection.service, &selection.storage)?;
        let migrator = storage
            .migrator()
            .ok_or_else(|| DaoError::UnknownStorage {
                service: selection.service.clone(),
                storage: selection.storage.clone(),
            })?;
        let service_config = self.filters.apply(
            self.service_configs
                .get(&selection.service)
                .cloned()
                .unwrap_or_default(),
        );
        let prefix = storage.resolve_prefix(&service_config);

        info!(
            "Starting migration run {}: {} from {} to {}{}",
            run_id,
            selection,
            source,
            target,
            if dry_run { " (dry run)" } else { "" }
        );

        info!("Phase 1: Opening DAOs (prefix '{}')", prefix);
        let from = self
            .catalog
            .open(
                DaoOptions::new(&source.driver, &source.dsn, &prefix)
                    .read_only(true)
                    .must_exist(true),
            )
            .await?;
        let to = match self
            .catalog
            .open(DaoOptions::new(&target.driver, &target.dsn, &prefix).read_only(dry_run))
            .await
        {
            Ok(to) => to,
            Err(e) => {
                close_dao(&from).await;
                return Err(e);
            }
        };

        if let Err(e) = init_both(&from, &to, &service_config).await {
            close_dao(&from).await;
            close_dao(&to).await;
            return Err(e);
        }

        info!("Phase 2: Migrating data");
        let (status, rx) = StatusSender::channel(self.status_buffer);
        let sink = self
            .sink
            .take()
            .unwrap_or_else(|| progress::sink_for(self.progress));
        let consumer = progress::spawn_consumer(rx, sink);

        let outcome = migrator
            .migrate(from.as_ref(), to.as_ref(), dry_run, status)
            .await;

        let summary = consumer.await.unwrap_or_else(|e| {
            warn!("Progress consumer failed: {}", e);
            Default::default()
        });

        info!("Phase 3: Closing DAOs");
        close_dao(&from).await;
        let closed = to.close().await;

        let counts = outcome?;
        closed?;

        let completed_at = Utc::now();
        let total_copied = counts.values().sum();
        let result = MigrationResult {
            run_id,
            service: selection.service.clone(),
            storage: selection.storage.clone(),
            source: source.clone(),
            target: target.clone(),
            prefix,
            dry_run,
            counts,
            total_copied,
            status_updates: summary.updates,
            duration_seconds: timer.elapsed().as_secs_f64(),
            started_at,
            completed_at,
            config_hash: self.config_hash.clone(),
        };

        info!(
            "Migration completed: {} entities in {:.1}s ({} status updates)",
            result.total_copied, result.duration_seconds, result.status_updates
        );
        Ok(result)
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("phase", &self.phase)
            .field("selection", &self.selection)
            .field("source", &self.source)
            .field("target", &self.target)
            .field("status_buffer", &self.status_buffer)
            .finish()
    }
}

async fn init_both(from: &Arc<dyn Dao>, to: &Arc<dyn Dao>, config: &ServiceConfig) -> Result<()> {
    for dao in [from, to] {
        dao.init(config).await.map_err(|e| match e {
            e @ DaoError::Connection { .. } => e,
            other => DaoError::connection(dao.driver(), dao.data_source(), other.to_string()),
        })?;
    }
    Ok(())
}

/// Close a DAO, logging failures.
async fn close_dao(dao: &Arc<dyn Dao>) {
    if let Err(e) = dao.close().await {
        warn!("Failed to close {} DAO: {}", dao.driver(), e);
    } else {
        debug!("Closed {} DAO", dao.driver());
    }
}
