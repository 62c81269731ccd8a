//! Parameter binding utilities for database statements.
//!
//! Values always travel as bound parameters, never as SQL text. NULLs carry
//! the column kind they stand in for, since PostgreSQL rejects a text-typed
//! NULL bound to a BIGINT or DOUBLE PRECISION column.

use crate::db::row::ColumnKind;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{MySql, Postgres, Sqlite};
use uuid::Uuid;

/// A single bound statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null(ColumnKind),
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(JsonValue),
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&String> for SqlParam {
    fn from(v: &String) -> Self {
        Self::Text(v.clone())
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// UUIDs are stored as their hyphenated text form on every backend.
impl From<Uuid> for SqlParam {
    fn from(v: Uuid) -> Self {
        Self::Text(v.hyphenated().to_string())
    }
}

/// Timestamps are stored as epoch milliseconds.
impl From<DateTime<Utc>> for SqlParam {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Int(v.timestamp_millis())
    }
}

impl From<JsonValue> for SqlParam {
    fn from(v: JsonValue) -> Self {
        Self::Json(v)
    }
}

/// Rust types with a fixed storage kind, so `None` can bind a typed NULL.
pub trait TypedParam: Into<SqlParam> {
    const KIND: ColumnKind;
}

impl TypedParam for String {
    const KIND: ColumnKind = ColumnKind::Text;
}
impl TypedParam for &str {
    const KIND: ColumnKind = ColumnKind::Text;
}
impl TypedParam for i64 {
    const KIND: ColumnKind = ColumnKind::Integer;
}
impl TypedParam for f64 {
    const KIND: ColumnKind = ColumnKind::Float;
}
impl TypedParam for bool {
    const KIND: ColumnKind = ColumnKind::Boolean;
}
impl TypedParam for Uuid {
    const KIND: ColumnKind = ColumnKind::Text;
}
impl TypedParam for DateTime<Utc> {
    const KIND: ColumnKind = ColumnKind::Integer;
}
impl TypedParam for JsonValue {
    const KIND: ColumnKind = ColumnKind::Json;
}

impl<T: TypedParam> From<Option<T>> for SqlParam {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Self::Null(T::KIND),
        }
    }
}

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q SqlParam,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        SqlParam::Null(kind) => match kind {
            ColumnKind::Integer => query.bind(None::<i64>),
            ColumnKind::Float => query.bind(None::<f64>),
            ColumnKind::Boolean => query.bind(None::<bool>),
            ColumnKind::Text => query.bind(None::<String>),
            ColumnKind::Json => query.bind(None::<Json<JsonValue>>),
        },
        SqlParam::Bool(v) => query.bind(*v),
        SqlParam::Int(v) => query.bind(*v),
        SqlParam::Float(v) => query.bind(*v),
        SqlParam::Text(v) => query.bind(v.as_str()),
        SqlParam::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q SqlParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        SqlParam::Null(kind) => match kind {
            ColumnKind::Integer => query.bind(None::<i64>),
            ColumnKind::Float => query.bind(None::<f64>),
            ColumnKind::Boolean => query.bind(None::<bool>),
            ColumnKind::Text => query.bind(None::<String>),
            ColumnKind::Json => query.bind(None::<Json<JsonValue>>),
        },
        SqlParam::Bool(v) => query.bind(*v),
        SqlParam::Int(v) => query.bind(*v),
        SqlParam::Float(v) => query.bind(*v),
        SqlParam::Text(v) => query.bind(v.as_str()),
        SqlParam::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q SqlParam,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        // SQLite is dynamically typed, any NULL fits any column
        SqlParam::Null(_) => query.bind(None::<String>),
        SqlParam::Bool(v) => query.bind(*v),
        SqlParam::Int(v) => query.bind(*v),
        SqlParam::Float(v) => query.bind(*v),
        SqlParam::Text(v) => query.bind(v.as_str()),
        // SQLite doesn't have native JSON type, store as string
        SqlParam::Json(v) => query.bind(v.to_string()),
    }
}
