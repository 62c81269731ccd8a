//! SQL dialect strategy.
//!
//! Every syntax difference between the supported backends lives here. The
//! dialect is chosen once from the configured [`DatabaseType`] and then passed
//! by value to the statement builder and the migration list, so no query site
//! branches on the backend itself.

use crate::models::DatabaseType;

/// Escape character used by every generated `LIKE` clause.
pub const LIKE_ESCAPE: char = '!';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Sqlite,
    Postgres,
    MySql,
}

impl Dialect {
    pub fn from_backend(db_type: DatabaseType) -> Self {
        match db_type {
            DatabaseType::SQLite => Self::Sqlite,
            DatabaseType::PostgreSQL => Self::Postgres,
            DatabaseType::MySQL => Self::MySql,
        }
    }

    pub fn backend(&self) -> DatabaseType {
        match self {
            Self::Sqlite => DatabaseType::SQLite,
            Self::Postgres => DatabaseType::PostgreSQL,
            Self::MySql => DatabaseType::MySQL,
        }
    }

    /// Placeholder for the `n`-th (1-based) bound parameter.
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Self::Postgres => format!("${n}"),
            Self::Sqlite | Self::MySql => "?".to_string(),
        }
    }

    /// Shape of the paging clause: `LIMIT n OFFSET m`, or `LIMIT m, n` on MySQL.
    pub(crate) fn paging(&self) -> Paging {
        match self {
            Self::MySql => Paging {
                separator: ", ",
                offset_first: true,
            },
            Self::Sqlite | Self::Postgres => Paging {
                separator: " OFFSET ",
                offset_first: false,
            },
        }
    }

    /// Planar (x, z) proximity predicate. SQLite builds may lack math
    /// functions, so it compares squared distances instead.
    pub(crate) fn proximity(&self) -> Proximity {
        match self {
            Self::Postgres => Proximity::Root("POWER"),
            Self::MySql => Proximity::Root("POW"),
            Self::Sqlite => Proximity::Squared,
        }
    }

    /// Case-insensitive `LIKE` for a column against one placeholder bound to
    /// lowercased text. SQLite matches the column's shadow copy instead, see
    /// [`Dialect::uses_search_columns`].
    pub fn contains_ci(&self, column: &str, placeholder: &str) -> String {
        match self {
            Self::Postgres => format!("{column} ILIKE {placeholder} ESCAPE '{LIKE_ESCAPE}'"),
            Self::MySql => format!(
                "LOWER({column}) LIKE LOWER({placeholder}) ESCAPE '{LIKE_ESCAPE}'"
            ),
            Self::Sqlite => format!(
                "{} LIKE {placeholder} ESCAPE '{LIKE_ESCAPE}'",
                search_column(column)
            ),
        }
    }

    /// SQLite's `LOWER()` folds ASCII only. Its searchable text columns carry
    /// a lowercased `search_*` copy written by the repositories.
    pub fn uses_search_columns(&self) -> bool {
        matches!(self, Self::Sqlite)
    }

    /// Whether `INSERT ... RETURNING id` is available. MySQL reports the
    /// generated key through the last insert id instead.
    pub fn supports_returning(&self) -> bool {
        !matches!(self, Self::MySql)
    }

    /// DDL inside a transaction is rolled back with it. MySQL commits DDL
    /// implicitly, so its migration steps must be idempotent on their own.
    pub fn supports_transactional_ddl(&self) -> bool {
        !matches!(self, Self::MySql)
    }

    // -------------------------------------------------------------------------
    // Schema type names
    // -------------------------------------------------------------------------

    pub fn autoincrement_pk(&self) -> &'static str {
        match self {
            Self::Postgres => "BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY",
            Self::MySql => "BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY",
            Self::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
        }
    }

    pub fn json_type(&self) -> &'static str {
        match self {
            Self::Postgres => "JSONB",
            Self::MySql => "JSON",
            Self::Sqlite => "TEXT",
        }
    }

    pub fn bool_type(&self) -> &'static str {
        match self {
            Self::Sqlite => "INTEGER",
            Self::Postgres | Self::MySql => "BOOLEAN",
        }
    }

    pub fn bool_literal(&self, value: bool) -> &'static str {
        match (self, value) {
            (Self::Sqlite, true) => "1",
            (Self::Sqlite, false) => "0",
            (_, true) => "TRUE",
            (_, false) => "FALSE",
        }
    }

    pub fn double_type(&self) -> &'static str {
        match self {
            Self::Postgres => "DOUBLE PRECISION",
            Self::MySql => "DOUBLE",
            Self::Sqlite => "REAL",
        }
    }

    /// Unbounded text. MySQL cannot index or default `TEXT`, so key and
    /// indexed columns use [`Dialect::varchar`] instead.
    pub fn text_type(&self) -> &'static str {
        "TEXT"
    }

    pub fn varchar(&self, len: u32) -> String {
        match self {
            Self::Sqlite => "TEXT".to_string(),
            Self::Postgres | Self::MySql => format!("VARCHAR({len})"),
        }
    }

    /// Table options appended after the closing parenthesis of `CREATE TABLE`.
    pub fn table_suffix(&self) -> &'static str {
        match self {
            Self::MySql => " ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
            Self::Sqlite | Self::Postgres => "",
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.backend())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Paging {
    pub separator: &'static str,
    pub offset_first: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Proximity {
    /// `SQRT(f(x - ?, 2) + f(z - ?, 2)) <= ?` with the named power function.
    Root(&'static str),
    /// `(x - ?) * (x - ?) + (z - ?) * (z - ?) <= ?` against the squared radius.
    Squared,
}

/// Name of the lowercased shadow copy of `column`, keeping a table alias:
/// `e.name` becomes `e.search_name`.
pub fn search_column(column: &str) -> String {
    match column.rsplit_once('.') {
        Some((alias, name)) => format!("{alias}.search_{name}"),
        None => format!("search_{column}"),
    }
}

/// Escape `LIKE` wildcards and the escape character in user text and wrap
/// it for substring matching.
pub fn like_pattern(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('%');
    for ch in text.chars() {
        if ch == LIKE_ESCAPE || ch == '%' || ch == '_' {
            out.push(LIKE_ESCAPE);
        }
        out.push(ch);
    }
    out.push('%');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(Dialect::Postgres.placeholder(3), "$3");
        assert_eq!(Dialect::MySql.placeholder(3), "?");
        assert_eq!(Dialect::Sqlite.placeholder(1), "?");
    }

    #[test]
    fn test_dialect_from_backend() {
        assert_eq!(
            Dialect::from_backend(DatabaseType::PostgreSQL),
            Dialect::Postgres
        );
        assert_eq!(Dialect::from_backend(DatabaseType::MySQL), Dialect::MySql);
        assert_eq!(Dialect::Sqlite.backend(), DatabaseType::SQLite);
    }

    #[test]
    fn test_contains_ci() {
        assert_eq!(
            Dialect::Postgres.contains_ci("name", "$1"),
            "name ILIKE $1 ESCAPE '!'"
        );
        assert_eq!(
            Dialect::MySql.contains_ci("name", "?"),
            "LOWER(name) LIKE LOWER(?) ESCAPE '!'"
        );
        assert_eq!(
            Dialect::Sqlite.contains_ci("e.description", "?"),
            "e.search_description LIKE ? ESCAPE '!'"
        );
    }

    #[test]
    fn test_search_column_keeps_alias() {
        assert_eq!(search_column("name"), "search_name");
        assert_eq!(search_column("e.name"), "e.search_name");
        assert!(Dialect::Sqlite.uses_search_columns());
        assert!(!Dialect::Postgres.uses_search_columns());
        assert!(!Dialect::MySql.uses_search_columns());
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("gate"), "%gate%");
        assert_eq!(like_pattern("100%_off!"), "%100!%!_off!!%");
    }

    #[test]
    fn test_schema_types() {
        assert_eq!(Dialect::Postgres.json_type(), "JSONB");
        assert_eq!(Dialect::MySql.json_type(), "JSON");
        assert_eq!(Dialect::Sqlite.json_type(), "TEXT");
        assert_eq!(Dialect::Sqlite.bool_literal(true), "1");
        assert_eq!(Dialect::MySql.bool_literal(false), "FALSE");
        assert!(Dialect::Sqlite.autoincrement_pk().contains("AUTOINCREMENT"));
    }

    #[test]
    fn test_capabilities() {
        assert!(Dialect::Postgres.supports_returning());
        assert!(Dialect::Sqlite.supports_returning());
        assert!(!Dialect::MySql.supports_returning());
        assert!(!Dialect::MySql.supports_transactional_ddl());
    }
}
