//! Versioned, forward-only schema migration.
//!
//! The ledger table `schema_version` records one row per applied step. Each
//! pending step runs in its own unit of work together with its ledger insert,
//! so a failure leaves the ledger at the last step that fully committed.

use crate::db::dialect::Dialect;
use crate::db::pool::PoolManager;
use crate::db::row::Column;
use crate::db::statement::{Statement, StatementBuilder};
use crate::db::transaction::TransactionManager;
use crate::error::{StoreError, StoreResult};
use crate::models::{SchemaVersionRecord, now_millis};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// One schema step. `statements` renders the DDL for a dialect.
#[derive(Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    statements: fn(Dialect) -> Vec<String>,
}

impl Migration {
    pub fn new(
        version: i64,
        description: &'static str,
        statements: fn(Dialect) -> Vec<String>,
    ) -> Self {
        Self {
            version,
            description,
            statements,
        }
    }

    pub fn statements(&self, dialect: Dialect) -> Vec<String> {
        (self.statements)(dialect)
    }
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MigrationState {
    NotStarted,
    CheckingVersion,
    Applying(i64),
    UpToDate,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub from_version: i64,
    pub to_version: i64,
    /// Versions applied by this run, ascending.
    pub applied: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationStatus {
    pub current_version: i64,
    pub latest_version: i64,
    pub pending: Vec<i64>,
    pub applied: Vec<SchemaVersionRecord>,
}

const LEDGER_COLUMNS: &[Column] = &[
    Column::integer("version"),
    Column::text("description"),
    Column::integer("applied_at"),
];

pub struct Migrator {
    pool: Arc<PoolManager>,
    transactions: TransactionManager,
    migrations: Vec<Migration>,
    state: watch::Sender<MigrationState>,
}

impl Migrator {
    /// Migrator over the built-in migration list.
    pub fn new(pool: Arc<PoolManager>) -> Self {
        Self::with_migrations(pool, crate::db::migrations::builtin())
    }

    pub fn with_migrations(pool: Arc<PoolManager>, migrations: Vec<Migration>) -> Self {
        let (state, _) = watch::channel(MigrationState::NotStarted);
        Self {
            transactions: TransactionManager::new(pool.clone()),
            pool,
            migrations,
            state,
        }
    }

    pub fn state(&self) -> MigrationState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<MigrationState> {
        self.state.subscribe()
    }

    pub fn latest_version(&self) -> i64 {
        self.migrations.last().map(|m| m.version).unwrap_or(0)
    }

    fn set_state(&self, state: MigrationState) {
        debug!(state = ?state, "Migration state changed");
        self.state.send_replace(state);
    }

    /// Versions must be strictly increasing and positive.
    fn validate(&self) -> StoreResult<()> {
        let mut previous = 0;
        for migration in &self.migrations {
            if migration.version <= previous {
                return Err(StoreError::migration(
                    migration.version,
                    format!(
                        "migration versions must be positive and strictly increasing (after {})",
                        previous
                    ),
                ));
            }
            previous = migration.version;
        }
        Ok(())
    }

    /// Bring the schema up to the latest version.
    pub async fn run(&self) -> StoreResult<MigrationReport> {
        match self.run_inner().await {
            Ok(report) => {
                self.set_state(MigrationState::UpToDate);
                Ok(report)
            }
            Err(err) => {
                self.set_state(MigrationState::Failed);
                error!(error = %err, "Schema migration failed");
                Err(err)
            }
        }
    }

    async fn run_inner(&self) -> StoreResult<MigrationReport> {
        self.validate()?;
        self.set_state(MigrationState::CheckingVersion);

        self.ensure_ledger().await?;
        let from_version = self.current_version().await?;
        let latest = self.latest_version();

        if from_version > latest {
            return Err(StoreError::migration(
                from_version,
                format!(
                    "database schema is at version {} but this build only knows up to {}",
                    from_version, latest
                ),
            ));
        }

        let pending: Vec<&Migration> = self
            .migrations
            .iter()
            .filter(|m| m.version > from_version)
            .collect();

        if pending.is_empty() {
            info!(version = from_version, "Schema is up to date");
            return Ok(MigrationReport {
                from_version,
                to_version: from_version,
                applied: Vec::new(),
            });
        }

        info!(
            from = from_version,
            to = latest,
            pending = pending.len(),
            backend = %self.pool.backend(),
            "Applying schema migrations"
        );

        let mut applied = Vec::with_capacity(pending.len());
        for migration in pending {
            self.set_state(MigrationState::Applying(migration.version));
            self.apply(migration).await?;
            applied.push(migration.version);
        }

        let to_version = applied.last().copied().unwrap_or(from_version);
        info!(version = to_version, "Schema migrations complete");
        Ok(MigrationReport {
            from_version,
            to_version,
            applied,
        })
    }

    async fn apply(&self, migration: &Migration) -> StoreResult<()> {
        let dialect = self.pool.dialect();
        let version = migration.version;
        let fail = |err: StoreError| StoreError::migration(version, err.to_string());

        if !dialect.supports_transactional_ddl() {
            debug!(version, "DDL commits implicitly on this backend");
        }

        let mut uow = self.transactions.begin().await.map_err(fail)?;
        for sql in migration.statements(dialect) {
            uow.execute(&Statement::raw(sql)).await.map_err(fail)?;
        }

        let mut ledger = StatementBuilder::with_sql(
            dialect,
            "INSERT INTO schema_version (version, description, applied_at) VALUES (",
        );
        ledger
            .bind(version)
            .push(", ")
            .bind(migration.description)
            .push(", ")
            .bind(now_millis())
            .push(")");
        uow.execute(&ledger.into_statement()).await.map_err(fail)?;
        uow.commit().await.map_err(fail)?;

        info!(
            version,
            description = migration.description,
            "Applied migration"
        );
        Ok(())
    }

    async fn ensure_ledger(&self) -> StoreResult<()> {
        let dialect = self.pool.dialect();
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS schema_version (
    version BIGINT NOT NULL PRIMARY KEY,
    description {} NOT NULL,
    applied_at BIGINT NOT NULL
){}",
            dialect.varchar(255),
            dialect.table_suffix()
        );
        self.pool
            .pool()
            .await
            .execute(&Statement::raw(sql))
            .await
            .map_err(|e| StoreError::migration(0, e.to_string()))?;
        Ok(())
    }

    /// Highest applied version; 0 for an empty ledger.
    pub async fn current_version(&self) -> StoreResult<i64> {
        let row = self
            .pool
            .pool()
            .await
            .fetch_optional(
                &Statement::raw("SELECT MAX(version) AS version FROM schema_version"),
                &[Column::integer("version")],
            )
            .await?;
        match row {
            Some(row) => Ok(row.opt_i64("version")?.unwrap_or(0)),
            None => Ok(0),
        }
    }

    /// Ledger rows in ascending version order.
    pub async fn applied_versions(&self) -> StoreResult<Vec<SchemaVersionRecord>> {
        let rows = self
            .pool
            .pool()
            .await
            .fetch_all(
                &Statement::raw(
                    "SELECT version, description, applied_at FROM schema_version ORDER BY version",
                ),
                LEDGER_COLUMNS,
            )
            .await?;
        rows.iter()
            .map(|row| {
                Ok(SchemaVersionRecord {
                    version: row.i64("version")?,
                    description: row.text("description")?,
                    applied_at: row.timestamp("applied_at")?,
                })
            })
            .collect()
    }

    /// Ledger contents and pending versions, without applying anything.
    pub async fn status(&self) -> StoreResult<MigrationStatus> {
        self.validate()?;
        self.ensure_ledger().await?;
        let applied = self.applied_versions().await?;
        let current_version = applied.iter().map(|r| r.version).max().unwrap_or(0);
        let pending = self
            .migrations
            .iter()
            .map(|m| m.version)
            .filter(|v| *v > current_version)
            .collect();
        if current_version > self.latest_version() {
            warn!(
                current = current_version,
                latest = self.latest_version(),
                "Database schema is newer than this build"
            );
        }
        Ok(MigrationStatus {
            current_version,
            latest_version: self.latest_version(),
            pending,
            applied,
        })
    }
}
