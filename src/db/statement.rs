//! Parameterized statement builder.
//!
//! SQL text is assembled from fixed fragments while every value goes through
//! [`StatementBuilder::bind`], which appends the dialect's placeholder and
//! records the parameter. User input never reaches the SQL text.

use crate::db::dialect::{Dialect, Proximity, like_pattern};
use crate::db::params::SqlParam;

/// A finished statement: SQL text plus its bound parameters, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl Statement {
    /// A statement without parameters (DDL, fixed probes).
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatementBuilder {
    dialect: Dialect,
    sql: String,
    params: Vec<SqlParam>,
}

impl StatementBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    /// Start from a fixed SQL prefix.
    pub fn with_sql(dialect: Dialect, sql: &str) -> Self {
        let mut builder = Self::new(dialect);
        builder.push(sql);
        builder
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Append a fixed SQL fragment.
    pub fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    /// Bind a value and append its placeholder.
    pub fn bind(&mut self, value: impl Into<SqlParam>) -> &mut Self {
        let placeholder = self.next_placeholder(value.into());
        self.sql.push_str(&placeholder);
        self
    }

    /// Bind a comma-separated list of values, e.g. an `INSERT` value tuple.
    pub fn bind_list<I, T>(&mut self, values: I) -> &mut Self
    where
        I: IntoIterator<Item = T>,
        T: Into<SqlParam>,
    {
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.bind(value);
        }
        self
    }

    fn next_placeholder(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        self.dialect.placeholder(self.params.len())
    }

    /// Append the paging clause. `offset` is in rows.
    pub fn paging(&mut self, limit: i64, offset: i64) -> &mut Self {
        let paging = self.dialect.paging();
        let (first, second) = if paging.offset_first {
            (offset, limit)
        } else {
            (limit, offset)
        };
        self.push(" LIMIT ").bind(first);
        self.push(paging.separator).bind(second)
    }

    /// Append a predicate matching rows whose (x, z) lies within `radius` of
    /// the given point.
    pub fn within_distance(
        &mut self,
        x_col: &str,
        z_col: &str,
        x: f64,
        z: f64,
        radius: f64,
    ) -> &mut Self {
        match self.dialect.proximity() {
            Proximity::Root(pow) => {
                self.push(&format!("SQRT({pow}({x_col} - "))
                    .bind(x)
                    .push(&format!(", 2) + {pow}({z_col} - "))
                    .bind(z)
                    .push(", 2)) <= ")
                    .bind(radius)
            }
            Proximity::Squared => {
                self.push(&format!("(({x_col} - "))
                    .bind(x)
                    .push(&format!(") * ({x_col} - "))
                    .bind(x)
                    .push(&format!(") + ({z_col} - "))
                    .bind(z)
                    .push(&format!(") * ({z_col} - "))
                    .bind(z)
                    .push(")) <= ")
                    .bind(radius * radius)
            }
        }
    }

    /// Append a case-insensitive substring match on `column`. The text is
    /// lowercased here, with full Unicode folding.
    pub fn contains_ci(&mut self, column: &str, text: &str) -> &mut Self {
        let pattern = like_pattern(&text.to_lowercase());
        let placeholder = self.next_placeholder(SqlParam::Text(pattern));
        let clause = self.dialect.contains_ci(column, &placeholder);
        self.push(&clause)
    }

    /// Append `(a matches OR b matches ...)` for the same search text.
    pub fn any_contains_ci(&mut self, columns: &[&str], text: &str) -> &mut Self {
        self.push("(");
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                self.push(" OR ");
            }
            self.contains_ci(column, text);
        }
        self.push(")")
    }

    pub fn build(&self) -> Statement {
        Statement {
            sql: self.sql.clone(),
            params: self.params.clone(),
        }
    }

    pub fn into_statement(self) -> Statement {
        Statement {
            sql: self.sql,
            params: self.params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_numbers_placeholders() {
        let mut b = StatementBuilder::with_sql(Dialect::Postgres, "SELECT * FROM t WHERE a = ");
        b.bind(1_i64).push(" AND b = ").bind("x");
        let stmt = b.build();
        assert_eq!(stmt.sql, "SELECT * FROM t WHERE a = $1 AND b = $2");
        assert_eq!(stmt.params, vec![SqlParam::Int(1), SqlParam::Text("x".into())]);
    }

    #[test]
    fn test_paging_per_dialect() {
        let mut b = StatementBuilder::with_sql(Dialect::Sqlite, "SELECT 1");
        b.paging(10, 20);
        let stmt = b.build();
        assert_eq!(stmt.sql, "SELECT 1 LIMIT ? OFFSET ?");
        assert_eq!(stmt.params, vec![SqlParam::Int(10), SqlParam::Int(20)]);

        let mut b = StatementBuilder::with_sql(Dialect::MySql, "SELECT 1");
        b.paging(10, 20);
        let stmt = b.build();
        assert_eq!(stmt.sql, "SELECT 1 LIMIT ?, ?");
        assert_eq!(stmt.params, vec![SqlParam::Int(20), SqlParam::Int(10)]);

        let mut b = StatementBuilder::with_sql(Dialect::Postgres, "SELECT 1");
        b.paging(5, 0);
        assert_eq!(b.build().sql, "SELECT 1 LIMIT $1 OFFSET $2");
    }

    #[test]
    fn test_within_distance_postgres() {
        let mut b = StatementBuilder::new(Dialect::Postgres);
        b.within_distance("l.x", "l.z", 1.0, 2.0, 3.0);
        let stmt = b.build();
        assert_eq!(
            stmt.sql,
            "SQRT(POWER(l.x - $1, 2) + POWER(l.z - $2, 2)) <= $3"
        );
        assert_eq!(stmt.params.len(), 3);
    }

    #[test]
    fn test_within_distance_sqlite_uses_squared_radius() {
        let mut b = StatementBuilder::new(Dialect::Sqlite);
        b.within_distance("x", "z", 1.0, 2.0, 3.0);
        let stmt = b.build();
        assert!(!stmt.sql.contains("SQRT"));
        assert_eq!(stmt.params.last(), Some(&SqlParam::Float(9.0)));
        assert_eq!(stmt.params.len(), 5);
    }

    #[test]
    fn test_search_text_is_bound_not_interpolated() {
        let mut b = StatementBuilder::with_sql(Dialect::MySql, "SELECT * FROM t WHERE ");
        b.any_contains_ci(&["name", "description"], "'; DROP TABLE t; --");
        let stmt = b.build();
        assert!(!stmt.sql.contains("DROP"));
        assert_eq!(
            stmt.sql,
            "SELECT * FROM t WHERE (LOWER(name) LIKE LOWER(?) ESCAPE '!' OR LOWER(description) LIKE LOWER(?) ESCAPE '!')"
        );
        assert_eq!(stmt.params.len(), 2);
    }

    #[test]
    fn test_sqlite_search_uses_lowercased_shadow_columns() {
        let mut b = StatementBuilder::with_sql(Dialect::Sqlite, "SELECT * FROM lore_entry e WHERE ");
        b.any_contains_ci(&["e.name"], "ÄLTESTE");
        let stmt = b.build();
        assert_eq!(
            stmt.sql,
            "SELECT * FROM lore_entry e WHERE (e.search_name LIKE ? ESCAPE '!')"
        );
        assert_eq!(stmt.params, vec![SqlParam::Text("%älteste%".into())]);
    }

    #[test]
    fn test_bind_list() {
        let mut b = StatementBuilder::with_sql(Dialect::Postgres, "VALUES (");
        b.bind_list([1_i64, 2, 3]).push(")");
        assert_eq!(b.build().sql, "VALUES ($1, $2, $3)");
    }
}
