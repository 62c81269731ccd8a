//! Typed repositories, one per entity family.
//!
//! Every repository implements [`Repository`] for the five common operations
//! and adds its own finders. Multi-statement writes go through a
//! [`UnitOfWork`]; single reads go straight to the pool.

use crate::db::dialect::search_column;
use crate::db::{
    Column, ColumnKind, DbRow, Dialect, ExecOutcome, PoolManager, SqlParam, Statement,
    StatementBuilder, TransactionManager, UnitOfWork,
};
use crate::error::{OperationContext, StoreError, StoreResult};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::info;

pub mod collection;
pub mod discovery;
pub mod item;
pub mod lore;

pub use collection::ItemCollectionRepository;
pub use discovery::PlayerDiscoveryRepository;
pub use item::ItemPropertiesRepository;
pub use lore::LoreEntryRepository;

/// Common CRUD and search contract.
#[async_trait]
pub trait Repository: Send + Sync {
    type Record: Send + Sync;
    type Id: Send + Sync;

    async fn find_by_id(&self, id: &Self::Id) -> StoreResult<Option<Self::Record>>;

    async fn find_all(&self) -> StoreResult<Vec<Self::Record>>;

    /// Case-insensitive substring match over the record's name and
    /// description. Blank text matches everything; no match is an empty list.
    async fn search(&self, text: &str) -> StoreResult<Vec<Self::Record>>;

    /// Update every column if the id exists, otherwise insert. Returns the
    /// stored id, generated when the record did not carry one.
    async fn save(&self, record: &Self::Record) -> StoreResult<Self::Id>;

    /// `false` when nothing was stored under `id`.
    async fn delete(&self, id: &Self::Id) -> StoreResult<bool>;
}

/// Shared handles every repository is built from.
#[derive(Debug, Clone)]
pub struct RepositoryContext {
    pool: Arc<PoolManager>,
    transactions: TransactionManager,
}

impl RepositoryContext {
    pub fn new(pool: Arc<PoolManager>) -> Self {
        Self {
            transactions: TransactionManager::new(pool.clone()),
            pool,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.pool.dialect()
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    pub(crate) fn builder(&self, sql: &str) -> StatementBuilder {
        StatementBuilder::with_sql(self.dialect(), sql)
    }

    pub(crate) async fn begin(&self, operation: &str) -> StoreResult<UnitOfWork> {
        self.transactions.begin().await.during(operation)
    }

    pub(crate) async fn fetch_all(
        &self,
        operation: &str,
        stmt: &Statement,
        columns: &[Column],
    ) -> StoreResult<Vec<DbRow>> {
        self.pool
            .pool()
            .await
            .fetch_all(stmt, columns)
            .await
            .during(operation)
    }

    pub(crate) async fn fetch_optional(
        &self,
        operation: &str,
        stmt: &Statement,
        columns: &[Column],
    ) -> StoreResult<Option<DbRow>> {
        self.pool
            .pool()
            .await
            .fetch_optional(stmt, columns)
            .await
            .during(operation)
    }

    pub(crate) async fn execute(
        &self,
        operation: &str,
        stmt: &Statement,
    ) -> StoreResult<ExecOutcome> {
        self.pool.pool().await.execute(stmt).await.during(operation)
    }

    /// `SELECT COUNT(*) AS n ...` on the pool.
    pub(crate) async fn count(&self, operation: &str, stmt: &Statement) -> StoreResult<i64> {
        let row = self.fetch_optional(operation, stmt, COUNT_COLUMNS).await?;
        count_of(row)
    }
}

pub(crate) const COUNT_COLUMNS: &[Column] = &[Column::integer("n")];

pub(crate) fn count_of(row: Option<DbRow>) -> StoreResult<i64> {
    match row {
        Some(row) => row.i64("n"),
        None => Ok(0),
    }
}

/// `COUNT(*)` inside a unit of work.
pub(crate) async fn count_in(uow: &mut UnitOfWork, stmt: &Statement) -> StoreResult<i64> {
    let row = uow.fetch_optional(stmt, COUNT_COLUMNS).await?;
    count_of(row)
}

pub(crate) fn decode_all<T>(
    rows: Vec<DbRow>,
    map: impl Fn(&DbRow) -> StoreResult<T>,
) -> StoreResult<Vec<T>> {
    rows.iter().map(map).collect()
}

pub(crate) fn require_text(field: &str, value: &str) -> StoreResult<()> {
    if value.trim().is_empty() {
        return Err(StoreError::constraint(format!("{field} must not be empty")));
    }
    Ok(())
}

pub(crate) fn string_list_json(lines: &[String]) -> JsonValue {
    JsonValue::Array(lines.iter().cloned().map(JsonValue::String).collect())
}

pub(crate) fn json_string_list(column: &str, value: JsonValue) -> StoreResult<Vec<String>> {
    match value {
        JsonValue::Null => Ok(Vec::new()),
        JsonValue::Array(items) => items
            .into_iter()
            .map(|item| match item {
                JsonValue::String(s) => Ok(s),
                other => Err(StoreError::decode(
                    column,
                    format!("expected string element, found {other}"),
                )),
            })
            .collect(),
        other => Err(StoreError::decode(
            column,
            format!("expected array, found {other}"),
        )),
    }
}

/// The lowercased `search_*` copies of one table's searchable columns.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SearchColumns {
    pub table: &'static str,
    pub key: Column,
    pub sources: &'static [&'static str],
}

impl SearchColumns {
    /// Rewrite the copies for the row under `key`. `values` follow
    /// `sources`. Nothing to do on backends that fold case in SQL.
    pub(crate) async fn refresh(
        &self,
        uow: &mut UnitOfWork,
        key: impl Into<SqlParam>,
        values: &[&str],
    ) -> StoreResult<()> {
        let dialect = uow.dialect();
        if !dialect.uses_search_columns() {
            return Ok(());
        }
        let mut b = StatementBuilder::with_sql(dialect, &format!("UPDATE {} SET ", self.table));
        for (i, (source, value)) in self.sources.iter().zip(values).enumerate() {
            if i > 0 {
                b.push(", ");
            }
            b.push(&format!("{} = ", search_column(source)))
                .bind(value.to_lowercase());
        }
        b.push(&format!(" WHERE {} = ", self.key.name)).bind(key);
        uow.execute(&b.into_statement()).await?;
        Ok(())
    }

    async fn rebuild(&self, uow: &mut UnitOfWork) -> StoreResult<u64> {
        let mut columns = vec![self.key];
        columns.extend(self.sources.iter().map(|&source| Column::text(source)));
        let sql = format!(
            "SELECT {}, {} FROM {}",
            self.key.name,
            self.sources.join(", "),
            self.table
        );
        let rows = uow.fetch_all(&Statement::raw(sql), &columns).await?;
        for row in &rows {
            let key = match self.key.kind {
                ColumnKind::Integer => SqlParam::from(row.i64(self.key.name)?),
                _ => SqlParam::from(row.text(self.key.name)?),
            };
            let values = self
                .sources
                .iter()
                .map(|source| row.text(source))
                .collect::<StoreResult<Vec<_>>>()?;
            let values: Vec<&str> = values.iter().map(String::as_str).collect();
            self.refresh(uow, key, &values).await?;
        }
        Ok(rows.len() as u64)
    }
}

/// Recompute every `search_*` copy from its source text in one unit of
/// work. Needed once after the migration that adds the copies, since SQL on
/// those backends cannot lowercase non-ASCII text. Returns rows rewritten.
pub async fn rebuild_search_columns(ctx: &RepositoryContext) -> StoreResult<u64> {
    const OP: &str = "search_columns.rebuild";
    if !ctx.dialect().uses_search_columns() {
        return Ok(0);
    }
    let mut uow = ctx.begin(OP).await?;
    let mut rows = 0;
    for index in [lore::SEARCH, item::SEARCH, collection::SEARCH] {
        rows += index.rebuild(&mut uow).await.during(OP)?;
    }
    uow.commit().await.during(OP)?;
    info!(rows, "Rebuilt search columns");
    Ok(rows)
}

/// 1-based page number to a row offset. Page 0 is treated as page 1.
pub(crate) fn page_offset(page: u32, page_size: u32) -> (i64, i64) {
    let size = i64::from(page_size.max(1));
    let page = i64::from(page.max(1));
    (size, (page - 1) * size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_offset() {
        assert_eq!(page_offset(1, 10), (10, 0));
        assert_eq!(page_offset(0, 10), (10, 0));
        assert_eq!(page_offset(3, 25), (25, 50));
        assert_eq!(page_offset(2, 0), (1, 1));
    }

    #[test]
    fn test_string_list_json_round_trip() {
        let lines = vec!["Forged in".to_string(), "dragon fire".to_string()];
        let json = string_list_json(&lines);
        assert_eq!(json_string_list("lore_lines", json).unwrap(), lines);
        assert!(json_string_list("lore_lines", JsonValue::Null).unwrap().is_empty());
        assert!(json_string_list("lore_lines", serde_json::json!([1])).is_err());
    }

    #[test]
    fn test_require_text() {
        assert!(require_text("name", "Gate").is_ok());
        assert_eq!(
            require_text("name", "   ").unwrap_err().kind(),
            crate::error::ErrorKind::ConstraintViolation
        );
    }
}
