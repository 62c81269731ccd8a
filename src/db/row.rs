//! Backend-neutral row decoding.
//!
//! Repositories declare the columns they select together with a
//! [`ColumnKind`]; the per-backend decoders below turn a driver row into a
//! [`DbRow`] so that record mapping is written once for all backends.
//!
//! Storage conventions shared by every table: integers are `BIGINT` (`i64`),
//! UUIDs are text, timestamps are epoch milliseconds and semi-structured
//! columns are native JSON where the backend has it, else serialized text.

use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

/// Logical storage kind of a selected column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Boolean,
    Text,
    Json,
}

/// A selected column: its result name and how to decode it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
}

impl Column {
    pub const fn integer(name: &'static str) -> Self {
        Self {
            name,
            kind: ColumnKind::Integer,
        }
    }

    pub const fn float(name: &'static str) -> Self {
        Self {
            name,
            kind: ColumnKind::Float,
        }
    }

    pub const fn boolean(name: &'static str) -> Self {
        Self {
            name,
            kind: ColumnKind::Boolean,
        }
    }

    pub const fn text(name: &'static str) -> Self {
        Self {
            name,
            kind: ColumnKind::Text,
        }
    }

    pub const fn json(name: &'static str) -> Self {
        Self {
            name,
            kind: ColumnKind::Json,
        }
    }
}

/// A decoded column value. `Null` is kept distinct from every kind.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Json(JsonValue),
}

/// One decoded result row, addressed by column name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DbRow {
    values: Vec<(&'static str, SqlValue)>,
}

impl DbRow {
    pub fn new(values: Vec<(&'static str, SqlValue)>) -> Self {
        Self { values }
    }

    fn get(&self, column: &str) -> StoreResult<&SqlValue> {
        self.values
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, v)| v)
            .ok_or_else(|| StoreError::decode(column, "column was not selected"))
    }

    pub fn is_null(&self, column: &str) -> StoreResult<bool> {
        Ok(matches!(self.get(column)?, SqlValue::Null))
    }

    pub fn opt_text(&self, column: &str) -> StoreResult<Option<String>> {
        match self.get(column)? {
            SqlValue::Null => Ok(None),
            SqlValue::Text(s) => Ok(Some(s.clone())),
            other => Err(mismatch(column, "text", other)),
        }
    }

    pub fn text(&self, column: &str) -> StoreResult<String> {
        self.opt_text(column)?
            .ok_or_else(|| StoreError::decode(column, "unexpected NULL"))
    }

    pub fn opt_i64(&self, column: &str) -> StoreResult<Option<i64>> {
        match self.get(column)? {
            SqlValue::Null => Ok(None),
            SqlValue::Int(v) => Ok(Some(*v)),
            other => Err(mismatch(column, "integer", other)),
        }
    }

    pub fn i64(&self, column: &str) -> StoreResult<i64> {
        self.opt_i64(column)?
            .ok_or_else(|| StoreError::decode(column, "unexpected NULL"))
    }

    pub fn opt_f64(&self, column: &str) -> StoreResult<Option<f64>> {
        match self.get(column)? {
            SqlValue::Null => Ok(None),
            SqlValue::Float(v) => Ok(Some(*v)),
            // SQLite may hand back whole numbers from REAL columns as integers
            SqlValue::Int(v) => Ok(Some(*v as f64)),
            other => Err(mismatch(column, "float", other)),
        }
    }

    pub fn f64(&self, column: &str) -> StoreResult<f64> {
        self.opt_f64(column)?
            .ok_or_else(|| StoreError::decode(column, "unexpected NULL"))
    }

    pub fn bool(&self, column: &str) -> StoreResult<bool> {
        match self.get(column)? {
            SqlValue::Bool(v) => Ok(*v),
            SqlValue::Int(v) => Ok(*v != 0),
            other => Err(mismatch(column, "boolean", other)),
        }
    }

    /// Semi-structured column; NULL decodes as JSON `null`.
    pub fn json(&self, column: &str) -> StoreResult<JsonValue> {
        match self.get(column)? {
            SqlValue::Null => Ok(JsonValue::Null),
            SqlValue::Json(v) => Ok(v.clone()),
            other => Err(mismatch(column, "json", other)),
        }
    }

    pub fn opt_uuid(&self, column: &str) -> StoreResult<Option<Uuid>> {
        self.opt_text(column)?
            .map(|s| Uuid::parse_str(&s).map_err(|e| StoreError::decode(column, e.to_string())))
            .transpose()
    }

    pub fn uuid(&self, column: &str) -> StoreResult<Uuid> {
        self.opt_uuid(column)?
            .ok_or_else(|| StoreError::decode(column, "unexpected NULL"))
    }

    /// Epoch-millisecond column as a UTC timestamp.
    pub fn timestamp(&self, column: &str) -> StoreResult<DateTime<Utc>> {
        let millis = self.i64(column)?;
        DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| StoreError::decode(column, format!("timestamp out of range: {millis}")))
    }
}

fn mismatch(column: &str, expected: &str, found: &SqlValue) -> StoreError {
    StoreError::decode(column, format!("expected {expected}, found {found:?}"))
}

fn column_error(column: &Column, err: sqlx::Error) -> StoreError {
    StoreError::decode(column.name, err.to_string())
}

fn parse_json_text(column: &Column, text: Option<String>) -> StoreResult<SqlValue> {
    match text {
        None => Ok(SqlValue::Null),
        Some(s) => serde_json::from_str(&s)
            .map(SqlValue::Json)
            .map_err(|e| StoreError::decode(column.name, e.to_string())),
    }
}

fn or_null<T>(value: Option<T>, f: impl FnOnce(T) -> SqlValue) -> SqlValue {
    value.map(f).unwrap_or(SqlValue::Null)
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

pub(crate) mod mysql {
    use super::*;

    pub fn decode_row(row: &MySqlRow, columns: &[Column]) -> StoreResult<DbRow> {
        columns
            .iter()
            .map(|col| decode_column(row, col).map(|v| (col.name, v)))
            .collect::<StoreResult<Vec<_>>>()
            .map(DbRow::new)
    }

    fn decode_column(row: &MySqlRow, col: &Column) -> StoreResult<SqlValue> {
        let value = match col.kind {
            ColumnKind::Integer => or_null(
                row.try_get::<Option<i64>, _>(col.name)
                    .map_err(|e| column_error(col, e))?,
                SqlValue::Int,
            ),
            ColumnKind::Float => or_null(
                row.try_get::<Option<f64>, _>(col.name)
                    .map_err(|e| column_error(col, e))?,
                SqlValue::Float,
            ),
            ColumnKind::Boolean => or_null(
                row.try_get::<Option<bool>, _>(col.name)
                    .map_err(|e| column_error(col, e))?,
                SqlValue::Bool,
            ),
            ColumnKind::Text => or_null(
                row.try_get::<Option<String>, _>(col.name)
                    .map_err(|e| column_error(col, e))?,
                SqlValue::Text,
            ),
            // MySQL JSON type should be decoded as serde_json::Value directly
            ColumnKind::Json => or_null(
                row.try_get::<Option<JsonValue>, _>(col.name)
                    .map_err(|e| column_error(col, e))?,
                SqlValue::Json,
            ),
        };
        Ok(value)
    }
}

pub(crate) mod postgres {
    use super::*;

    pub fn decode_row(row: &PgRow, columns: &[Column]) -> StoreResult<DbRow> {
        columns
            .iter()
            .map(|col| decode_column(row, col).map(|v| (col.name, v)))
            .collect::<StoreResult<Vec<_>>>()
            .map(DbRow::new)
    }

    fn decode_column(row: &PgRow, col: &Column) -> StoreResult<SqlValue> {
        let value = match col.kind {
            ColumnKind::Integer => or_null(
                row.try_get::<Option<i64>, _>(col.name)
                    .map_err(|e| column_error(col, e))?,
                SqlValue::Int,
            ),
            ColumnKind::Float => or_null(
                row.try_get::<Option<f64>, _>(col.name)
                    .map_err(|e| column_error(col, e))?,
                SqlValue::Float,
            ),
            ColumnKind::Boolean => or_null(
                row.try_get::<Option<bool>, _>(col.name)
                    .map_err(|e| column_error(col, e))?,
                SqlValue::Bool,
            ),
            ColumnKind::Text => or_null(
                row.try_get::<Option<String>, _>(col.name)
                    .map_err(|e| column_error(col, e))?,
                SqlValue::Text,
            ),
            ColumnKind::Json => or_null(
                row.try_get::<Option<JsonValue>, _>(col.name)
                    .map_err(|e| column_error(col, e))?,
                SqlValue::Json,
            ),
        };
        Ok(value)
    }
}

pub(crate) mod sqlite {
    use super::*;

    pub fn decode_row(row: &SqliteRow, columns: &[Column]) -> StoreResult<DbRow> {
        columns
            .iter()
            .map(|col| decode_column(row, col).map(|v| (col.name, v)))
            .collect::<StoreResult<Vec<_>>>()
            .map(DbRow::new)
    }

    fn decode_column(row: &SqliteRow, col: &Column) -> StoreResult<SqlValue> {
        let value = match col.kind {
            ColumnKind::Integer => or_null(
                row.try_get::<Option<i64>, _>(col.name)
                    .map_err(|e| column_error(col, e))?,
                SqlValue::Int,
            ),
            ColumnKind::Float => or_null(
                row.try_get::<Option<f64>, _>(col.name)
                    .map_err(|e| column_error(col, e))?,
                SqlValue::Float,
            ),
            // Stored as INTEGER 0/1
            ColumnKind::Boolean => or_null(
                row.try_get::<Option<bool>, _>(col.name)
                    .map_err(|e| column_error(col, e))?,
                SqlValue::Bool,
            ),
            ColumnKind::Text => or_null(
                row.try_get::<Option<String>, _>(col.name)
                    .map_err(|e| column_error(col, e))?,
                SqlValue::Text,
            ),
            // SQLite has no JSON type, the column holds serialized text
            ColumnKind::Json => parse_json_text(
                col,
                row.try_get::<Option<String>, _>(col.name)
                    .map_err(|e| column_error(col, e))?,
            )?,
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> DbRow {
        DbRow::new(vec![
            ("id", SqlValue::Text("6f1c2a58-9d43-4b8e-a2b1-0c5e4f7d9a31".into())),
            ("name", SqlValue::Text("Ancient Gate".into())),
            ("x", SqlValue::Int(120)),
            ("z", SqlValue::Float(-40.5)),
            ("approved", SqlValue::Int(0)),
            ("created_at", SqlValue::Int(1_700_000_000_000)),
            ("world", SqlValue::Null),
            ("metadata", SqlValue::Json(serde_json::json!({"era": "first"}))),
        ])
    }

    #[test]
    fn test_typed_accessors() {
        let row = sample_row();
        assert_eq!(row.text("name").unwrap(), "Ancient Gate");
        assert_eq!(row.f64("x").unwrap(), 120.0);
        assert_eq!(row.f64("z").unwrap(), -40.5);
        assert!(!row.bool("approved").unwrap());
        assert_eq!(row.opt_text("world").unwrap(), None);
        assert_eq!(row.timestamp("created_at").unwrap().timestamp(), 1_700_000_000);
        assert_eq!(row.json("metadata").unwrap()["era"], "first");
        assert!(row.uuid("id").is_ok());
    }

    #[test]
    fn test_null_in_required_column_is_decode_error() {
        let err = sample_row().text("world").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Decode);
    }

    #[test]
    fn test_unselected_column_is_decode_error() {
        assert!(sample_row().text("missing").is_err());
    }

    #[test]
    fn test_kind_mismatch_is_decode_error() {
        assert!(sample_row().i64("name").is_err());
    }

    #[test]
    fn test_invalid_json_text() {
        let col = Column::json("metadata");
        assert!(parse_json_text(&col, Some("{not json".into())).is_err());
        assert_eq!(parse_json_text(&col, None).unwrap(), SqlValue::Null);
    }
}
