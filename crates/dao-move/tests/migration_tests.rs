//! End-to-end migrations between the built-in drivers.

use std::path::Path;

use dao_move::drivers::{MemoryDao, SqliteDao};
use dao_move::{
    Config, Dao, DaoError, DaoOptions, DataSource, DriverCatalog, MigrationPhase, Orchestrator,
    Record, RecordStore, ServiceConfig,
};
use tempfile::TempDir;

const CONFIG: &str = r#"
databases:
  - name: main
    driver: sqlite3
    dsn: "sqlite::memory:"
services:
  docstore:
    prefix: docs_
    storages: [main, index]
migration:
  progress: none
  report_every: 2
"#;

fn sqlite_dsn(path: &Path) -> String {
    format!("sqlite:{}", path.display())
}

async fn seed_sqlite(path: &Path, prefix: &str, records: &[(&str, &str, &str)]) {
    let dao = SqliteDao::open(DaoOptions::new("sqlite3", sqlite_dsn(path), prefix))
        .await
        .unwrap();
    dao.init(&ServiceConfig::default()).await.unwrap();
    for (collection, key, value) in records {
        dao.put(collection, &Record::new(*key, *value)).await.unwrap();
    }
    dao.close().await.unwrap();
}

fn orchestrator() -> Orchestrator {
    let config = Config::from_yaml(CONFIG).unwrap();
    Orchestrator::from_config(&config, DriverCatalog::with_builtins())
}

#[tokio::test]
async fn sqlite_to_memory_snapshot() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("main.db");
    let snapshot = dir.path().join("main.json");
    seed_sqlite(
        &db,
        "docs_",
        &[
            ("nodes", "n1", "root"),
            ("nodes", "n2", "child"),
            ("nodes", "n3", "leaf"),
            ("meta", "version", "3"),
        ],
    )
    .await;

    let mut orchestrator = orchestrator();
    orchestrator.select("docstore", "main").unwrap();
    orchestrator
        .select_source(DataSource::new("sqlite3", sqlite_dsn(&db)))
        .unwrap();
    orchestrator
        .select_target(DataSource::new("memory", snapshot.to_string_lossy()))
        .unwrap();

    let result = orchestrator.run(false).await.unwrap();
    assert_eq!(result.counts.get("nodes"), Some(&3));
    assert_eq!(result.counts.get("meta"), Some(&1));
    assert_eq!(result.total_copied, 4);

    let target = MemoryDao::open(
        DaoOptions::new("memory", snapshot.to_string_lossy(), "docs_").read_only(true),
    )
    .await
    .unwrap();
    assert_eq!(target.count("nodes").await.unwrap(), 3);
    assert_eq!(
        target.scan("meta").await.unwrap(),
        vec![Record::new("version", "3")]
    );
}

#[tokio::test]
async fn secondary_storage_uses_its_own_prefix() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("index.db");
    let target_db = dir.path().join("copy.db");
    seed_sqlite(&db, "docs_index_", &[("terms", "a", "1"), ("terms", "b", "2")]).await;
    seed_sqlite(&db, "docs_", &[("nodes", "ignored", "x")]).await;

    let mut orchestrator = orchestrator();
    orchestrator.select("docstore", "index").unwrap();
    orchestrator
        .select_source(DataSource::new("sqlite3", sqlite_dsn(&db)))
        .unwrap();
    orchestrator
        .select_target(DataSource::new("sqlite3", sqlite_dsn(&target_db)))
        .unwrap();

    let result = orchestrator.run(false).await.unwrap();
    assert_eq!(result.prefix, "docs_index_");
    assert_eq!(result.counts.len(), 1);
    assert_eq!(result.counts.get("terms"), Some(&2));
}

#[tokio::test]
async fn dry_run_to_sqlite_creates_nothing() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("source.db");
    let target_db = dir.path().join("target.db");
    seed_sqlite(&db, "docs_", &[("nodes", "n1", "root")]).await;

    let mut orchestrator = orchestrator();
    orchestrator.select("docstore", "main").unwrap();
    orchestrator
        .select_source(DataSource::new("sqlite3", sqlite_dsn(&db)))
        .unwrap();
    orchestrator
        .select_target(DataSource::new("sqlite3", sqlite_dsn(&target_db)))
        .unwrap();

    let result = orchestrator.run(true).await.unwrap();
    assert!(result.dry_run);
    assert_eq!(result.counts.get("nodes"), Some(&1));
    assert!(!target_db.exists());
}

#[tokio::test]
async fn rerun_overwrites_existing_keys() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("source.db");
    let snapshot = dir.path().join("target.json");
    seed_sqlite(&db, "docs_", &[("nodes", "n1", "v2")]).await;

    let existing = MemoryDao::open(DaoOptions::new("memory", snapshot.to_string_lossy(), "docs_"))
        .await
        .unwrap();
    existing
        .put("nodes", &Record::new("n1", "v1"))
        .await
        .unwrap();
    existing.close().await.unwrap();

    let mut orchestrator = orchestrator();
    orchestrator.select("docstore", "main").unwrap();
    orchestrator
        .select_source(DataSource::new("sqlite3", sqlite_dsn(&db)))
        .unwrap();
    orchestrator
        .select_target(DataSource::new("memory", snapshot.to_string_lossy()))
        .unwrap();
    orchestrator.run(false).await.unwrap();
    assert_eq!(orchestrator.phase(), MigrationPhase::Completed);

    let target = MemoryDao::open(DaoOptions::new("memory", snapshot.to_string_lossy(), "docs_"))
        .await
        .unwrap();
    assert_eq!(
        target.scan("nodes").await.unwrap(),
        vec![Record::new("n1", "v2")]
    );
}

#[tokio::test]
async fn unreadable_snapshot_fails_before_migrating() {
    let dir = TempDir::new().unwrap();
    let snapshot = dir.path().join("broken.json");
    std::fs::write(&snapshot, "{ not json").unwrap();

    let mut orchestrator = orchestrator();
    orchestrator.select("docstore", "main").unwrap();
    orchestrator
        .select_source(DataSource::new("memory", snapshot.to_string_lossy()))
        .unwrap();
    orchestrator
        .select_target(DataSource::new("memory", ":memory:"))
        .unwrap();

    let err = orchestrator.run(false).await.unwrap_err();
    assert!(matches!(err, DaoError::Connection { .. }));
    assert_eq!(err.exit_code(), dao_move::error::EXIT_CONNECTION_ERROR);
    assert_eq!(orchestrator.phase(), MigrationPhase::Failed);
}

#[tokio::test]
async fn storages_sharing_a_snapshot_migrate_separately() {
    let dir = TempDir::new().unwrap();
    let shared = dir.path().join("shared.json");
    let copy = dir.path().join("copy.json");
    for (prefix, collection, key) in [("docs_", "nodes", "n1"), ("docs_index_", "terms", "t1")] {
        let dao = MemoryDao::open(DaoOptions::new("memory", shared.to_string_lossy(), prefix))
            .await
            .unwrap();
        dao.put(collection, &Record::new(key, "v")).await.unwrap();
        dao.close().await.unwrap();
    }

    let mut orchestrator = orchestrator();
    orchestrator.select("docstore", "main").unwrap();
    orchestrator
        .select_source(DataSource::new("memory", shared.to_string_lossy()))
        .unwrap();
    orchestrator
        .select_target(DataSource::new("memory", copy.to_string_lossy()))
        .unwrap();

    let result = orchestrator.run(false).await.unwrap();
    assert_eq!(result.counts.len(), 1);
    assert_eq!(result.counts.get("nodes"), Some(&1));

    let target = MemoryDao::open(
        DaoOptions::new("memory", copy.to_string_lossy(), "docs_index_").read_only(true),
    )
    .await
    .unwrap();
    assert!(target.collections().await.unwrap().is_empty());
}
