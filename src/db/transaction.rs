//! Unit-of-work transactions.
//!
//! A [`UnitOfWork`] owns one pooled connection with an open transaction for
//! its whole life. It ends in exactly one of three ways: `commit()`,
//! `rollback()`, or drop. Dropping it uncommitted rolls back; sqlx queues the
//! `ROLLBACK` on the connection before it goes back to the pool, so a pooled
//! connection never carries an open transaction into the next operation.

use crate::db::dialect::Dialect;
use crate::db::executor::ExecOutcome;
use crate::db::pool::PoolManager;
use crate::db::row::{Column, DbRow};
use crate::db::statement::Statement;
use crate::error::{StoreError, StoreResult};
use crate::impl_db_dispatch;
use crate::models::DatabaseType;
use futures_util::future::BoxFuture;
use sqlx::{MySql, Postgres, Sqlite, Transaction};
use std::sync::Arc;
use tracing::{debug, warn};

/// Database-specific transaction wrapper.
///
/// This enum wraps database-specific transaction types to provide
/// a unified interface for transaction management.
pub enum DbTransaction {
    /// MySQL transaction
    MySql(Transaction<'static, MySql>),
    /// PostgreSQL transaction
    Postgres(Transaction<'static, Postgres>),
    /// SQLite transaction
    SQLite(Transaction<'static, Sqlite>),
}

impl DbTransaction {
    /// Get the database type for this transaction.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbTransaction::MySql(_) => DatabaseType::MySQL,
            DbTransaction::Postgres(_) => DatabaseType::PostgreSQL,
            DbTransaction::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Commit the transaction.
    pub async fn commit(self) -> StoreResult<()> {
        match self {
            DbTransaction::MySql(tx) => tx.commit().await.map_err(StoreError::from),
            DbTransaction::Postgres(tx) => tx.commit().await.map_err(StoreError::from),
            DbTransaction::SQLite(tx) => tx.commit().await.map_err(StoreError::from),
        }
    }

    /// Rollback the transaction.
    pub async fn rollback(self) -> StoreResult<()> {
        match self {
            DbTransaction::MySql(tx) => tx.rollback().await.map_err(StoreError::from),
            DbTransaction::Postgres(tx) => tx.rollback().await.map_err(StoreError::from),
            DbTransaction::SQLite(tx) => tx.rollback().await.map_err(StoreError::from),
        }
    }
}

impl std::fmt::Debug for DbTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DbTransaction").field(&self.db_type()).finish()
    }
}

/// Scoped transaction guard.
#[derive(Debug)]
pub struct UnitOfWork {
    // Taken by commit/rollback; still present on drop means abandoned
    tx: Option<DbTransaction>,
    dialect: Dialect,
}

impl UnitOfWork {
    pub(crate) fn new(tx: DbTransaction, dialect: Dialect) -> Self {
        Self {
            tx: Some(tx),
            dialect,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn tx(&mut self) -> StoreResult<&mut DbTransaction> {
        self.tx.as_mut().ok_or_else(|| {
            StoreError::statement("unit of work", None, "transaction already finished")
        })
    }

    pub async fn fetch_all(
        &mut self,
        stmt: &Statement,
        columns: &[Column],
    ) -> StoreResult<Vec<DbRow>> {
        let tx = self.tx()?;
        impl_db_dispatch!(DbTransaction, tx, t => backend::fetch_all(&mut **t, stmt, columns).await)
    }

    pub async fn fetch_optional(
        &mut self,
        stmt: &Statement,
        columns: &[Column],
    ) -> StoreResult<Option<DbRow>> {
        let tx = self.tx()?;
        impl_db_dispatch!(DbTransaction, tx, t => backend::fetch_optional(&mut **t, stmt, columns).await)
    }

    pub async fn execute(&mut self, stmt: &Statement) -> StoreResult<ExecOutcome> {
        let tx = self.tx()?;
        impl_db_dispatch!(DbTransaction, tx, t => backend::execute(&mut **t, stmt).await)
    }

    /// Run an `INSERT` and return the generated integer key.
    pub async fn insert_returning_id(&mut self, stmt: &Statement) -> StoreResult<i64> {
        let tx = self.tx()?;
        impl_db_dispatch!(DbTransaction, tx, t => backend::insert_returning_id(&mut **t, stmt).await)
    }

    pub async fn commit(mut self) -> StoreResult<()> {
        match self.tx.take() {
            Some(tx) => {
                tx.commit().await?;
                debug!(backend = %self.dialect, "Transaction committed");
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub async fn rollback(mut self) -> StoreResult<()> {
        match self.tx.take() {
            Some(tx) => {
                tx.rollback().await?;
                debug!(backend = %self.dialect, "Transaction rolled back");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if self.tx.is_some() {
            // sqlx rolls back when the inner Transaction drops
            warn!(
                backend = %self.dialect,
                "Unit of work dropped without commit, rolling back"
            );
        }
    }
}

/// Hands out units of work over the managed pool.
#[derive(Debug, Clone)]
pub struct TransactionManager {
    pool: Arc<PoolManager>,
}

impl TransactionManager {
    pub fn new(pool: Arc<PoolManager>) -> Self {
        Self { pool }
    }

    pub fn dialect(&self) -> Dialect {
        self.pool.dialect()
    }

    /// Borrow a connection and open a transaction on it.
    pub async fn begin(&self) -> StoreResult<UnitOfWork> {
        let tx = self.pool.begin().await?;
        Ok(UnitOfWork::new(tx, self.pool.dialect()))
    }

    /// Run `work` in a fresh unit of work: commit on `Ok`, roll back on `Err`.
    ///
    /// ```ignore
    /// let id = transactions
    ///     .run(|uow| Box::pin(async move { uow.insert_returning_id(&stmt).await }))
    ///     .await?;
    /// ```
    pub async fn run<T, F>(&self, work: F) -> StoreResult<T>
    where
        T: Send,
        F: for<'a> FnOnce(&'a mut UnitOfWork) -> BoxFuture<'a, StoreResult<T>> + Send,
    {
        let mut uow = self.begin().await?;
        match work(&mut uow).await {
            Ok(value) => {
                uow.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = uow.rollback().await {
                    warn!(
                        error = %rollback_err,
                        "Rollback failed, connection discarded by the driver"
                    );
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::db::row::Column;
    use crate::db::statement::StatementBuilder;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Arc<PoolManager>) {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite:{}/tx.db", dir.path().display());
        let pool = PoolManager::configure(&DatabaseConfig::parse(&url).unwrap())
            .await
            .unwrap();
        pool.pool()
            .await
            .execute(&Statement::raw(
                "CREATE TABLE t (name TEXT PRIMARY KEY NOT NULL)",
            ))
            .await
            .unwrap();
        (dir, Arc::new(pool))
    }

    fn insert(name: &str) -> Statement {
        let mut b = StatementBuilder::with_sql(Dialect::Sqlite, "INSERT INTO t (name) VALUES (");
        b.bind(name).push(")");
        b.into_statement()
    }

    async fn count(pool: &PoolManager) -> i64 {
        let row = pool
            .pool()
            .await
            .fetch_optional(
                &Statement::raw("SELECT COUNT(*) AS n FROM t"),
                &[Column::integer("n")],
            )
            .await
            .unwrap()
            .unwrap();
        row.i64("n").unwrap()
    }

    #[tokio::test]
    async fn test_commit_persists() {
        let (_dir, pool) = setup().await;
        let tm = TransactionManager::new(pool.clone());

        let mut uow = tm.begin().await.unwrap();
        uow.execute(&insert("a")).await.unwrap();
        uow.execute(&insert("b")).await.unwrap();
        uow.commit().await.unwrap();

        assert_eq!(count(&pool).await, 2);
    }

    #[tokio::test]
    async fn test_drop_without_commit_rolls_back() {
        let (_dir, pool) = setup().await;
        let tm = TransactionManager::new(pool.clone());

        {
            let mut uow = tm.begin().await.unwrap();
            uow.execute(&insert("a")).await.unwrap();
        }

        // With a single connection this also proves it went back to the pool
        assert_eq!(count(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_run_rolls_back_on_error() {
        let (_dir, pool) = setup().await;
        let tm = TransactionManager::new(pool.clone());
        let first = insert("dup");
        let second = insert("dup");

        let result: StoreResult<()> = tm
            .run(move |uow| {
                Box::pin(async move {
                    uow.execute(&first).await?;
                    uow.execute(&second).await?;
                    Ok::<_, StoreError>(())
                })
            })
            .await;

        assert_eq!(
            result.unwrap_err().kind(),
            crate::error::ErrorKind::ConstraintViolation
        );
        assert_eq!(count(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_run_commits_on_ok() {
        let (_dir, pool) = setup().await;
        let tm = TransactionManager::new(pool.clone());
        let stmt = insert("solo");

        let affected = tm
            .run(move |uow| Box::pin(async move {
                Ok::<_, StoreError>(uow.execute(&stmt).await?.rows_affected)
            }))
            .await
            .unwrap();

        assert_eq!(affected, 1);
        assert_eq!(count(&pool).await, 1);
    }
}
