//! Statement execution.
//!
//! # Architecture
//!
//! The executor uses database-specific implementations organized in submodules:
//! - `mysql`: MySQL-specific fetch and write operations
//! - `postgres`: PostgreSQL-specific fetch and write operations
//! - `sqlite`: SQLite-specific fetch and write operations
//!
//! Each function is generic over `sqlx::Executor`, so the same code runs
//! against a pool, a checked-out connection or an open transaction
//! (`&mut **tx`). Rows are decoded into [`DbRow`] right away so nothing
//! backend-specific escapes this module.

use crate::db::row::{Column, DbRow};
use crate::db::statement::Statement;
use crate::error::{StoreError, StoreResult};
use tracing::debug;

/// Result of a write statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecOutcome {
    pub rows_affected: u64,
    /// Generated key reported by the driver, where the backend reports one.
    pub last_insert_id: Option<i64>,
}

fn trace_statement(kind: &str, stmt: &Statement) {
    debug!(
        sql = %stmt.sql,
        params = stmt.params.len(),
        "Executing {}",
        kind
    );
}

fn missing_id() -> StoreError {
    StoreError::statement("insert", None, "insert did not report a generated id")
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// The code structure is intentionally parallel to make differences obvious.

pub(crate) mod mysql {
    use super::*;
    use crate::db::params::bind_mysql_param;
    use crate::db::row::mysql::decode_row;
    use sqlx::{Executor, MySql};

    #[cfg(test)]
    pub const NAME: &str = "mysql";

    pub async fn fetch_all<'c, E>(
        executor: E,
        stmt: &Statement,
        columns: &[Column],
    ) -> StoreResult<Vec<DbRow>>
    where
        E: Executor<'c, Database = MySql>,
    {
        trace_statement("query", stmt);
        let mut query = sqlx::query(&stmt.sql);
        for param in &stmt.params {
            query = bind_mysql_param(query, param);
        }
        let rows = query.fetch_all(executor).await?;
        rows.iter().map(|row| decode_row(row, columns)).collect()
    }

    pub async fn fetch_optional<'c, E>(
        executor: E,
        stmt: &Statement,
        columns: &[Column],
    ) -> StoreResult<Option<DbRow>>
    where
        E: Executor<'c, Database = MySql>,
    {
        trace_statement("query", stmt);
        let mut query = sqlx::query(&stmt.sql);
        for param in &stmt.params {
            query = bind_mysql_param(query, param);
        }
        let row = query.fetch_optional(executor).await?;
        row.map(|row| decode_row(&row, columns)).transpose()
    }

    pub async fn execute<'c, E>(executor: E, stmt: &Statement) -> StoreResult<ExecOutcome>
    where
        E: Executor<'c, Database = MySql>,
    {
        trace_statement("write", stmt);
        // When params is empty, execute raw SQL directly to avoid prepared statement issues
        // (some DDL doesn't support prepared statements)
        let result = if stmt.params.is_empty() {
            executor.execute(stmt.sql.as_str()).await?
        } else {
            let mut query = sqlx::query(&stmt.sql);
            for param in &stmt.params {
                query = bind_mysql_param(query, param);
            }
            query.execute(executor).await?
        };
        let last_insert_id = i64::try_from(result.last_insert_id())
            .ok()
            .filter(|id| *id > 0);
        Ok(ExecOutcome {
            rows_affected: result.rows_affected(),
            last_insert_id,
        })
    }

    /// MySQL has no `RETURNING`; the generated key comes from the OK packet.
    pub async fn insert_returning_id<'c, E>(executor: E, stmt: &Statement) -> StoreResult<i64>
    where
        E: Executor<'c, Database = MySql>,
    {
        execute(executor, stmt)
            .await?
            .last_insert_id
            .ok_or_else(missing_id)
    }
}

pub(crate) mod postgres {
    use super::*;
    use crate::db::params::bind_postgres_param;
    use crate::db::row::postgres::decode_row;
    use sqlx::{Executor, Postgres, Row};

    #[cfg(test)]
    pub const NAME: &str = "postgres";

    pub async fn fetch_all<'c, E>(
        executor: E,
        stmt: &Statement,
        columns: &[Column],
    ) -> StoreResult<Vec<DbRow>>
    where
        E: Executor<'c, Database = Postgres>,
    {
        trace_statement("query", stmt);
        let mut query = sqlx::query(&stmt.sql);
        for param in &stmt.params {
            query = bind_postgres_param(query, param);
        }
        let rows = query.fetch_all(executor).await?;
        rows.iter().map(|row| decode_row(row, columns)).collect()
    }

    pub async fn fetch_optional<'c, E>(
        executor: E,
        stmt: &Statement,
        columns: &[Column],
    ) -> StoreResult<Option<DbRow>>
    where
        E: Executor<'c, Database = Postgres>,
    {
        trace_statement("query", stmt);
        let mut query = sqlx::query(&stmt.sql);
        for param in &stmt.params {
            query = bind_postgres_param(query, param);
        }
        let row = query.fetch_optional(executor).await?;
        row.map(|row| decode_row(&row, columns)).transpose()
    }

    pub async fn execute<'c, E>(executor: E, stmt: &Statement) -> StoreResult<ExecOutcome>
    where
        E: Executor<'c, Database = Postgres>,
    {
        trace_statement("write", stmt);
        let result = if stmt.params.is_empty() {
            executor.execute(stmt.sql.as_str()).await?
        } else {
            let mut query = sqlx::query(&stmt.sql);
            for param in &stmt.params {
                query = bind_postgres_param(query, param);
            }
            query.execute(executor).await?
        };
        Ok(ExecOutcome {
            rows_affected: result.rows_affected(),
            last_insert_id: None,
        })
    }

    pub async fn insert_returning_id<'c, E>(executor: E, stmt: &Statement) -> StoreResult<i64>
    where
        E: Executor<'c, Database = Postgres>,
    {
        trace_statement("insert", stmt);
        let sql = format!("{} RETURNING id", stmt.sql);
        let mut query = sqlx::query(&sql);
        for param in &stmt.params {
            query = bind_postgres_param(query, param);
        }
        let row = query.fetch_one(executor).await?;
        Ok(row.try_get::<i64, _>("id")?)
    }
}

pub(crate) mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite_param;
    use crate::db::row::sqlite::decode_row;
    use sqlx::{Executor, Row, Sqlite};

    #[cfg(test)]
    pub const NAME: &str = "sqlite";

    pub async fn fetch_all<'c, E>(
        executor: E,
        stmt: &Statement,
        columns: &[Column],
    ) -> StoreResult<Vec<DbRow>>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        trace_statement("query", stmt);
        let mut query = sqlx::query(&stmt.sql);
        for param in &stmt.params {
            query = bind_sqlite_param(query, param);
        }
        let rows = query.fetch_all(executor).await?;
        rows.iter().map(|row| decode_row(row, columns)).collect()
    }

    pub async fn fetch_optional<'c, E>(
        executor: E,
        stmt: &Statement,
        columns: &[Column],
    ) -> StoreResult<Option<DbRow>>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        trace_statement("query", stmt);
        let mut query = sqlx::query(&stmt.sql);
        for param in &stmt.params {
            query = bind_sqlite_param(query, param);
        }
        let row = query.fetch_optional(executor).await?;
        row.map(|row| decode_row(&row, columns)).transpose()
    }

    pub async fn execute<'c, E>(executor: E, stmt: &Statement) -> StoreResult<ExecOutcome>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        trace_statement("write", stmt);
        let result = if stmt.params.is_empty() {
            executor.execute(stmt.sql.as_str()).await?
        } else {
            let mut query = sqlx::query(&stmt.sql);
            for param in &stmt.params {
                query = bind_sqlite_param(query, param);
            }
            query.execute(executor).await?
        };
        let last_insert_id = Some(result.last_insert_rowid()).filter(|id| *id > 0);
        Ok(ExecOutcome {
            rows_affected: result.rows_affected(),
            last_insert_id,
        })
    }

    pub async fn insert_returning_id<'c, E>(executor: E, stmt: &Statement) -> StoreResult<i64>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        trace_statement("insert", stmt);
        let sql = format!("{} RETURNING id", stmt.sql);
        let mut query = sqlx::query(&sql);
        for param in &stmt.params {
            query = bind_sqlite_param(query, param);
        }
        let row = query.fetch_one(executor).await?;
        let id = row.try_get::<i64, _>("id")?;
        if id > 0 { Ok(id) } else { Err(missing_id()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::dialect::Dialect;
    use crate::db::row::Column;
    use crate::db::statement::StatementBuilder;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> sqlx::SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_sqlite_write_then_fetch() {
        let pool = memory_pool().await;
        sqlite::execute(
            &pool,
            &Statement::raw(
                "CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, score REAL)",
            ),
        )
        .await
        .unwrap();

        let mut insert = StatementBuilder::with_sql(Dialect::Sqlite, "INSERT INTO t (name, score) VALUES (");
        insert.bind_list(["gate".to_string()]).push(", ").bind(1.5_f64).push(")");
        let id = sqlite::insert_returning_id(&pool, &insert.build())
            .await
            .unwrap();
        assert_eq!(id, 1);

        let mut select = StatementBuilder::with_sql(Dialect::Sqlite, "SELECT id, name, score FROM t WHERE id = ");
        select.bind(id);
        let row = sqlite::fetch_optional(
            &pool,
            &select.build(),
            &[Column::integer("id"), Column::text("name"), Column::float("score")],
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(row.text("name").unwrap(), "gate");
        assert_eq!(row.f64("score").unwrap(), 1.5);
    }

    #[tokio::test]
    async fn test_sqlite_execute_reports_rows_affected() {
        let pool = memory_pool().await;
        sqlite::execute(&pool, &Statement::raw("CREATE TABLE t (name TEXT)"))
            .await
            .unwrap();
        sqlite::execute(&pool, &Statement::raw("INSERT INTO t VALUES ('a'), ('b')"))
            .await
            .unwrap();
        let outcome = sqlite::execute(&pool, &Statement::raw("DELETE FROM t"))
            .await
            .unwrap();
        assert_eq!(outcome.rows_affected, 2);
    }

    #[tokio::test]
    async fn test_sqlite_syntax_error_is_statement_error() {
        let pool = memory_pool().await;
        let err = sqlite::execute(&pool, &Statement::raw("CREATE TABLEX nope"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::StatementExecution);
    }

    #[tokio::test]
    async fn test_sqlite_unique_violation_is_constraint() {
        let pool = memory_pool().await;
        sqlite::execute(&pool, &Statement::raw("CREATE TABLE t (name TEXT PRIMARY KEY)"))
            .await
            .unwrap();
        let insert = Statement::raw("INSERT INTO t VALUES ('dup')");
        sqlite::execute(&pool, &insert).await.unwrap();
        let err = sqlite::execute(&pool, &insert).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConstraintViolation);
    }
}
