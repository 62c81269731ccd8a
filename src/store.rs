//! Store lifecycle: connect, migrate, monitor, wire repositories, shut down.

use crate::config::StoreConfig;
use crate::db::migrations::SEARCH_COLUMNS_VERSION;
use crate::db::{
    HealthMonitor, HealthState, MigrationReport, Migrator, PoolManager, PoolStats,
    TransactionManager,
};
use crate::error::{OperationContext, StoreError, StoreResult};
use crate::gateway::{AsyncGateway, AsyncRepository, StoreFuture};
use crate::models::{LoreEntryRecord, PlayerDiscoveryRecord};
use crate::repository::{
    ItemCollectionRepository, ItemPropertiesRepository, LoreEntryRepository,
    PlayerDiscoveryRepository, RepositoryContext, rebuild_search_columns,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};
use uuid::Uuid;

/// Bring the schema to the latest version. When this run added the
/// `search_*` columns, fill them from the existing rows.
pub async fn migrate(pool: &Arc<PoolManager>) -> StoreResult<MigrationReport> {
    let report = Migrator::new(pool.clone()).run().await?;
    if report.applied.contains(&SEARCH_COLUMNS_VERSION) {
        rebuild_search_columns(&RepositoryContext::new(pool.clone())).await?;
    }
    Ok(report)
}

/// The running persistence layer. Repositories exist only after the schema
/// reached the latest version.
pub struct LoreStore {
    pool: Arc<PoolManager>,
    gateway: Arc<AsyncGateway>,
    health: Arc<HealthMonitor>,
    transactions: TransactionManager,
    migration: MigrationReport,
    lore_entries: AsyncRepository<LoreEntryRepository>,
    items: AsyncRepository<ItemPropertiesRepository>,
    collections: AsyncRepository<ItemCollectionRepository>,
    discoveries: AsyncRepository<PlayerDiscoveryRepository>,
    shut_down: AtomicBool,
}

impl LoreStore {
    pub async fn initialize(config: StoreConfig, gateway: Arc<AsyncGateway>) -> StoreResult<Self> {
        info!(
            backend = %config.database.db_type,
            database = %config.database.masked_connection_string(),
            "Initializing lore store"
        );

        let pool = Arc::new(PoolManager::configure(&config.database).await?);

        let migration = match migrate(&pool).await {
            Ok(report) => report,
            Err(err) => {
                error!(error = %err, "Closing pool after failed migration");
                pool.close().await;
                return Err(err);
            }
        };

        let health = HealthMonitor::start(pool.clone(), config.health.clone());

        let ctx = RepositoryContext::new(pool.clone());
        let store = Self {
            transactions: ctx.transactions().clone(),
            lore_entries: AsyncRepository::new(
                Arc::new(LoreEntryRepository::new(ctx.clone())),
                gateway.clone(),
            ),
            items: AsyncRepository::new(
                Arc::new(ItemPropertiesRepository::new(ctx.clone())),
                gateway.clone(),
            ),
            collections: AsyncRepository::new(
                Arc::new(ItemCollectionRepository::new(ctx.clone())),
                gateway.clone(),
            ),
            discoveries: AsyncRepository::new(
                Arc::new(PlayerDiscoveryRepository::new(ctx)),
                gateway.clone(),
            ),
            pool,
            gateway,
            health,
            migration,
            shut_down: AtomicBool::new(false),
        };

        info!(
            backend = %store.pool.backend(),
            version = store.migration.to_version,
            "Lore store ready"
        );
        Ok(store)
    }

    /// Blocking start for hosts without a runtime. The store owns its own
    /// gateway runtime.
    pub fn start(config: StoreConfig) -> StoreResult<Self> {
        let gateway = AsyncGateway::with_runtime(&config.gateway)?;
        gateway.block_on(Self::initialize(config, gateway.clone()))
    }

    /// Drain queued work, stop the health monitor and close the pool.
    /// Later calls do nothing.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down lore store");
        self.gateway.drain().await;
        self.health.stop();
        self.pool.close().await;
        info!("Lore store stopped");
    }

    /// [`LoreStore::shutdown`] for non-async hosts.
    pub fn shutdown_blocking(&self) {
        self.gateway.block_on(self.shutdown());
    }

    pub fn lore_entries(&self) -> &AsyncRepository<LoreEntryRepository> {
        &self.lore_entries
    }

    pub fn items(&self) -> &AsyncRepository<ItemPropertiesRepository> {
        &self.items
    }

    pub fn collections(&self) -> &AsyncRepository<ItemCollectionRepository> {
        &self.collections
    }

    pub fn discoveries(&self) -> &AsyncRepository<PlayerDiscoveryRepository> {
        &self.discoveries
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    pub fn gateway(&self) -> &Arc<AsyncGateway> {
        &self.gateway
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn health_state(&self) -> HealthState {
        self.health.state()
    }

    /// What the startup migration run applied.
    pub fn migration_report(&self) -> &MigrationReport {
        &self.migration
    }

    pub async fn pool_stats(&self) -> PoolStats {
        self.pool.stats().await
    }

    /// Save a submitted entry and record the submitter's own discovery of
    /// it in one transaction.
    pub fn register_lore_entry(&self, record: LoreEntryRecord) -> StoreFuture<Uuid> {
        let transactions = self.transactions.clone();
        self.gateway.submit(async move {
            transactions
                .run(move |uow| {
                    Box::pin(async move {
                        let id = LoreEntryRepository::save_in(uow, &record).await?;
                        if let Some(player) = record.submitted_by {
                            let mut discovery = PlayerDiscoveryRecord::new(player, id);
                            if let Some(location) = record.location.clone() {
                                discovery = discovery.at(location);
                            }
                            PlayerDiscoveryRepository::record_in(uow, &discovery).await?;
                        }
                        Ok::<_, StoreError>(id)
                    })
                })
                .await
                .during("lore_entry.register")
        })
    }
}

impl std::fmt::Debug for LoreStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoreStore")
            .field("backend", &self.pool.backend())
            .field("schema_version", &self.migration.to_version)
            .field("health", &self.health.state())
            .finish_non_exhaustive()
    }
}
