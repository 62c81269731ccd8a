//! Built-in schema migrations.
//!
//! Steps are forward-only. Every statement that runs on MySQL is idempotent
//! on its own (`IF NOT EXISTS`), because MySQL commits DDL implicitly and a
//! retried run has to converge. MySQL cannot `CREATE INDEX IF NOT EXISTS`, so
//! its secondary indexes are declared inline with the tables instead of in v4.
//! `ALTER TABLE` steps only run where DDL rolls back with the ledger row.

use crate::db::dialect::{Dialect, search_column};
use crate::db::migrator::Migration;

/// Current schema version produced by [`builtin`].
pub const CURRENT_VERSION: i64 = 5;

/// Version that adds the lowercased `search_*` columns. Their contents are
/// filled from Rust after it is applied.
pub const SEARCH_COLUMNS_VERSION: i64 = 5;

pub fn builtin() -> Vec<Migration> {
    vec![
        Migration::new(1, "lore entries and locations", lore_tables),
        Migration::new(2, "player discoveries", discovery_table),
        Migration::new(3, "item properties and collections", item_tables),
        Migration::new(4, "secondary indexes", secondary_indexes),
        Migration::new(SEARCH_COLUMNS_VERSION, "search columns", search_columns),
    ]
}

fn inline_index(d: Dialect, name: &str, column: &str) -> String {
    match d {
        Dialect::MySql => format!(",\n    INDEX {name} ({column})"),
        Dialect::Sqlite | Dialect::Postgres => String::new(),
    }
}

fn lore_tables(d: Dialect) -> Vec<String> {
    let uuid = d.varchar(36);
    let double = d.double_type();
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS lore_entry (
    id {uuid} NOT NULL PRIMARY KEY,
    name {name} NOT NULL,
    description {text} NOT NULL,
    entry_type {tag} NOT NULL,
    submitted_by {uuid},
    approved {bool} NOT NULL DEFAULT {no},
    metadata {json},
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL{type_idx}{approved_idx}
){suffix}",
            name = d.varchar(255),
            text = d.text_type(),
            tag = d.varchar(32),
            bool = d.bool_type(),
            no = d.bool_literal(false),
            json = d.json_type(),
            type_idx = inline_index(d, "idx_lore_entry_type", "entry_type"),
            approved_idx = inline_index(d, "idx_lore_entry_approved", "approved"),
            suffix = d.table_suffix(),
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS lore_location (
    entry_id {uuid} NOT NULL PRIMARY KEY,
    world {world} NOT NULL,
    x {double} NOT NULL,
    y {double} NOT NULL,
    z {double} NOT NULL,
    FOREIGN KEY (entry_id) REFERENCES lore_entry (id) ON DELETE CASCADE{world_idx}
){suffix}",
            world = d.varchar(64),
            world_idx = inline_index(d, "idx_lore_location_world", "world"),
            suffix = d.table_suffix(),
        ),
    ]
}

// No foreign key to lore_entry: the discovery repository checks the
// reference itself so every backend behaves the same.
fn discovery_table(d: Dialect) -> Vec<String> {
    let uuid = d.varchar(36);
    let double = d.double_type();
    let mut statements = vec![format!(
        "CREATE TABLE IF NOT EXISTS player_discovery (
    player_id {uuid} NOT NULL,
    entry_id {uuid} NOT NULL,
    discovered_at BIGINT NOT NULL,
    world {world},
    x {double},
    y {double},
    z {double},
    PRIMARY KEY (player_id, entry_id){entry_idx}
){suffix}",
        world = d.varchar(64),
        entry_idx = inline_index(d, "idx_player_discovery_entry", "entry_id"),
        suffix = d.table_suffix(),
    )];
    if d != Dialect::MySql {
        statements.push(
            "CREATE INDEX IF NOT EXISTS idx_player_discovery_entry ON player_discovery (entry_id)"
                .to_string(),
        );
    }
    statements
}

fn item_tables(d: Dialect) -> Vec<String> {
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS item_properties (
    id {pk},
    display_name {name} NOT NULL,
    item_type {tag} NOT NULL,
    custom_model_data BIGINT,
    lore_lines {json},
    created_at BIGINT NOT NULL{type_idx}
){suffix}",
            pk = d.autoincrement_pk(),
            name = d.varchar(255),
            tag = d.varchar(64),
            json = d.json_type(),
            type_idx = inline_index(d, "idx_item_properties_type", "item_type"),
            suffix = d.table_suffix(),
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS item_collection (
    id {slug} NOT NULL PRIMARY KEY,
    name {name} NOT NULL,
    description {text} NOT NULL,
    theme {tag} NOT NULL,
    active {bool} NOT NULL DEFAULT {yes},
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL{theme_idx}
){suffix}",
            slug = d.varchar(64),
            name = d.varchar(255),
            text = d.text_type(),
            tag = d.varchar(64),
            bool = d.bool_type(),
            yes = d.bool_literal(true),
            theme_idx = inline_index(d, "idx_item_collection_theme", "theme"),
            suffix = d.table_suffix(),
        ),
    ]
}

fn secondary_indexes(d: Dialect) -> Vec<String> {
    if d == Dialect::MySql {
        return Vec::new();
    }
    [
        ("idx_lore_entry_type", "lore_entry", "entry_type"),
        ("idx_lore_entry_approved", "lore_entry", "approved"),
        ("idx_lore_location_world", "lore_location", "world"),
        ("idx_item_properties_type", "item_properties", "item_type"),
        ("idx_item_collection_theme", "item_collection", "theme"),
    ]
    .iter()
    .map(|(name, table, column)| format!("CREATE INDEX IF NOT EXISTS {name} ON {table} ({column})"))
    .collect()
}

/// Source columns that get a lowercased shadow copy on backends whose
/// `LOWER()` is ASCII-only.
pub(crate) const SEARCHABLE: &[(&str, &str)] = &[
    ("lore_entry", "name"),
    ("lore_entry", "description"),
    ("item_properties", "display_name"),
    ("item_properties", "item_type"),
    ("item_collection", "name"),
    ("item_collection", "description"),
];

fn search_columns(d: Dialect) -> Vec<String> {
    if !d.uses_search_columns() {
        return Vec::new();
    }
    SEARCHABLE
        .iter()
        .map(|(table, column)| {
            format!(
                "ALTER TABLE {table} ADD COLUMN {} TEXT NOT NULL DEFAULT ''",
                search_column(column)
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_versions_are_ordered() {
        let versions: Vec<i64> = builtin().iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 2, 3, 4, 5]);
        assert_eq!(versions.last().copied(), Some(CURRENT_VERSION));
    }

    #[test]
    fn test_every_statement_is_idempotent() {
        for dialect in [Dialect::Sqlite, Dialect::Postgres, Dialect::MySql] {
            for migration in builtin() {
                for sql in migration.statements(dialect) {
                    if dialect.supports_transactional_ddl() && sql.starts_with("ALTER TABLE") {
                        continue;
                    }
                    assert!(
                        sql.contains("IF NOT EXISTS"),
                        "v{} on {dialect}: {sql}",
                        migration.version
                    );
                }
            }
        }
    }

    #[test]
    fn test_mysql_indexes_inline() {
        let ddl = lore_tables(Dialect::MySql).join("\n");
        assert!(ddl.contains("INDEX idx_lore_entry_type (entry_type)"));
        assert!(ddl.contains("ENGINE=InnoDB"));
        assert!(secondary_indexes(Dialect::MySql).is_empty());
    }

    #[test]
    fn test_dialect_types_used() {
        let pg = item_tables(Dialect::Postgres).join("\n");
        assert!(pg.contains("GENERATED BY DEFAULT AS IDENTITY"));
        assert!(pg.contains("JSONB"));
        let sqlite = lore_tables(Dialect::Sqlite).join("\n");
        assert!(sqlite.contains("approved INTEGER NOT NULL DEFAULT 0"));
        assert!(sqlite.contains("x REAL NOT NULL"));
    }

    #[test]
    fn test_search_columns_only_on_sqlite() {
        let sqlite = search_columns(Dialect::Sqlite);
        assert_eq!(sqlite.len(), SEARCHABLE.len());
        assert_eq!(
            sqlite[0],
            "ALTER TABLE lore_entry ADD COLUMN search_name TEXT NOT NULL DEFAULT ''"
        );
        assert!(search_columns(Dialect::Postgres).is_empty());
        assert!(search_columns(Dialect::MySql).is_empty());
    }
}
