//! End-to-end store lifecycle: initialize, use through the gateway, shut down.

use lore_store::config::StoreConfig;
use lore_store::db::{HealthState, Migrator, PoolManager, Statement};
use lore_store::models::{LoreEntryRecord, LoreLocation, LoreType};
use lore_store::{AsyncGateway, ErrorKind, HostQueue, LoreStore, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::runtime::Handle;
use uuid::Uuid;

fn sqlite_config(dir: &TempDir) -> StoreConfig {
    StoreConfig::from_url(&format!("sqlite:{}/lore.db", dir.path().display())).unwrap()
}

#[test]
fn test_blocking_start_and_shutdown() {
    let dir = TempDir::new().unwrap();
    let store = LoreStore::start(sqlite_config(&dir)).unwrap();
    assert_eq!(store.migration_report().to_version, 5);
    assert_eq!(store.health_state(), HealthState::Healthy);

    let entry = LoreEntryRecord::new("Ancient Gate", "A crumbling portal", LoreType::Landmark);
    let id = store.lore_entries().save(entry).wait().unwrap();
    let loaded = store.lore_entries().find_by_id(id).wait().unwrap().unwrap();
    assert_eq!(loaded.name, "Ancient Gate");

    store.shutdown_blocking();
    store.shutdown_blocking();

    let rejected = store.lore_entries().find_all().wait();
    assert!(matches!(rejected, Err(StoreError::ShuttingDown)));
}

#[test]
fn test_continuation_runs_on_host_queue() {
    let dir = TempDir::new().unwrap();
    let store = LoreStore::start(sqlite_config(&dir)).unwrap();
    let queue = HostQueue::new();
    let (tx, rx) = std::sync::mpsc::channel();

    store
        .lore_entries()
        .search("anything")
        .then_on(&queue, move |result| {
            tx.send(result.map(|found| found.len())).unwrap();
        });

    let mut ran = 0;
    for _ in 0..400 {
        ran += queue.run_pending();
        if ran > 0 {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(ran, 1);
    assert_eq!(rx.try_recv().unwrap().unwrap(), 0);

    store.shutdown_blocking();
}

#[test]
fn test_register_lore_entry_records_submitter_discovery() {
    let dir = TempDir::new().unwrap();
    let store = LoreStore::start(sqlite_config(&dir)).unwrap();
    let player = Uuid::new_v4();

    let entry = LoreEntryRecord::new("Ancient Gate", "A crumbling portal", LoreType::Landmark)
        .with_location(LoreLocation::new("world", 120.0, 64.0, -40.0))
        .with_submitter(player);
    let id = store.register_lore_entry(entry).wait().unwrap();

    let found = store
        .discoveries()
        .call(move |repo| async move { repo.has_discovered(&player, &id).await })
        .wait()
        .unwrap();
    assert!(found);

    let pending = store
        .lore_entries()
        .call(|repo| async move { repo.find_pending().await })
        .wait()
        .unwrap();
    assert_eq!(pending.len(), 1);

    store.shutdown_blocking();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_saves_all_land() {
    let dir = TempDir::new().unwrap();
    let gateway = AsyncGateway::on_handle(Handle::current(), 8);
    let store = LoreStore::initialize(sqlite_config(&dir), gateway)
        .await
        .unwrap();

    let inputs: Vec<LoreEntryRecord> = (0..25)
        .map(|i| {
            LoreEntryRecord::new(
                format!("Entry {i}"),
                format!("Description of entry {i}"),
                LoreType::Generic,
            )
            .with_location(LoreLocation::new(
                format!("world_{i}"),
                f64::from(i),
                64.0,
                -f64::from(i),
            ))
            .with_metadata("index", i.to_string())
        })
        .collect();
    let futures: Vec<_> = inputs
        .iter()
        .map(|record| store.lore_entries().save(record.clone()))
        .collect();

    let mut expected = HashMap::new();
    for (future, input) in futures.into_iter().zip(inputs) {
        let id = future.await.unwrap();
        expected.insert(id, input);
    }
    assert_eq!(expected.len(), 25);

    // Each row carries exactly its own values, none mixed in from another save
    let all = store.lore_entries().find_all().await.unwrap();
    assert_eq!(all.len(), 25);
    for loaded in all {
        let input = expected.remove(&loaded.id).unwrap();
        assert_eq!(
            loaded,
            LoreEntryRecord {
                id: loaded.id,
                updated_at: loaded.updated_at,
                ..input
            }
        );
    }
    assert!(expected.is_empty());

    store.shutdown().await;
    assert_eq!(store.gateway().in_flight(), 0);
}

#[tokio::test]
async fn test_initialize_fails_on_newer_schema() {
    let dir = TempDir::new().unwrap();
    let config = sqlite_config(&dir);

    // A later build already migrated this database
    {
        let pool = Arc::new(PoolManager::configure(&config.database).await.unwrap());
        Migrator::new(pool.clone()).run().await.unwrap();
        pool.pool()
            .await
            .execute(&Statement::raw(
                "INSERT INTO schema_version (version, description, applied_at) VALUES (99, 'future', 0)",
            ))
            .await
            .unwrap();
        pool.close().await;
    }

    let gateway = AsyncGateway::on_handle(Handle::current(), 4);
    let err = LoreStore::initialize(config, gateway).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MigrationFailure);
}

#[tokio::test]
async fn test_initialize_rejects_unreachable_sqlite_path() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig::from_url(&format!(
        "sqlite:{}/missing/dir/lore.db",
        dir.path().display()
    ))
    .unwrap();
    let gateway = AsyncGateway::on_handle(Handle::current(), 4);
    assert!(LoreStore::initialize(config, gateway).await.is_err());
}
