//! Lore entries and their locations.

use super::{
    Repository, RepositoryContext, SearchColumns, count_in, decode_all, page_offset,
    require_text,
};
use crate::db::{Column, DbRow, StatementBuilder, UnitOfWork};
use crate::error::{OperationContext, StoreError, StoreResult};
use crate::models::{LoreEntryRecord, LoreLocation, LoreType, now_millis};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

const SELECT_ENTRY: &str = "SELECT e.id, e.name, e.description, e.entry_type, e.submitted_by, \
     e.approved, e.metadata, e.created_at, e.updated_at, l.world, l.x, l.y, l.z \
     FROM lore_entry e LEFT JOIN lore_location l ON l.entry_id = e.id";

const ENTRY_COLUMNS: &[Column] = &[
    Column::text("id"),
    Column::text("name"),
    Column::text("description"),
    Column::text("entry_type"),
    Column::text("submitted_by"),
    Column::boolean("approved"),
    Column::json("metadata"),
    Column::integer("created_at"),
    Column::integer("updated_at"),
    Column::text("world"),
    Column::float("x"),
    Column::float("y"),
    Column::float("z"),
];

const ORDER_BY_NAME: &str = " ORDER BY e.name, e.id";

pub(crate) const SEARCH: SearchColumns = SearchColumns {
    table: "lore_entry",
    key: Column::text("id"),
    sources: &["name", "description"],
};

#[derive(Debug, Clone)]
pub struct LoreEntryRepository {
    ctx: RepositoryContext,
}

impl LoreEntryRepository {
    pub fn new(ctx: RepositoryContext) -> Self {
        Self { ctx }
    }

    fn select(&self) -> StatementBuilder {
        self.ctx.builder(SELECT_ENTRY)
    }

    async fn query(&self, operation: &str, builder: StatementBuilder) -> StoreResult<Vec<LoreEntryRecord>> {
        let rows = self
            .ctx
            .fetch_all(operation, &builder.into_statement(), ENTRY_COLUMNS)
            .await?;
        decode_all(rows, map_entry)
    }

    pub async fn approve(&self, id: &Uuid) -> StoreResult<bool> {
        self.set_approved(id, true).await
    }

    /// The only way `approved` changes on a stored entry.
    pub async fn set_approved(&self, id: &Uuid, approved: bool) -> StoreResult<bool> {
        let mut b = self.ctx.builder("UPDATE lore_entry SET approved = ");
        b.bind(approved)
            .push(", updated_at = ")
            .bind(now_millis())
            .push(" WHERE id = ")
            .bind(*id);
        let outcome = self
            .ctx
            .execute("lore_entry.set_approved", &b.into_statement())
            .await?;
        let found = outcome.rows_affected > 0;
        if found {
            info!(entry_id = %id, approved, "Lore entry approval changed");
        }
        Ok(found)
    }

    pub async fn find_by_type(&self, entry_type: LoreType) -> StoreResult<Vec<LoreEntryRecord>> {
        let mut b = self.select();
        b.push(" WHERE e.entry_type = ")
            .bind(entry_type.as_str())
            .push(ORDER_BY_NAME);
        self.query("lore_entry.find_by_type", b).await
    }

    /// Entries awaiting approval, oldest first.
    pub async fn find_pending(&self) -> StoreResult<Vec<LoreEntryRecord>> {
        let mut b = self.select();
        b.push(" WHERE e.approved = ")
            .bind(false)
            .push(" ORDER BY e.created_at, e.id");
        self.query("lore_entry.find_pending", b).await
    }

    /// Entries in `world` within `radius` blocks of (x, z), ignoring height.
    pub async fn find_nearby(
        &self,
        world: &str,
        x: f64,
        z: f64,
        radius: f64,
    ) -> StoreResult<Vec<LoreEntryRecord>> {
        if radius < 0.0 || !radius.is_finite() {
            return Err(StoreError::constraint("radius must be a finite, non-negative number"));
        }
        let mut b = self.select();
        b.push(" WHERE l.world = ")
            .bind(world)
            .push(" AND ")
            .within_distance("l.x", "l.z", x, z, radius)
            .push(ORDER_BY_NAME);
        self.query("lore_entry.find_nearby", b).await
    }

    /// 1-based page in creation order.
    pub async fn find_page(&self, page: u32, page_size: u32) -> StoreResult<Vec<LoreEntryRecord>> {
        let (limit, offset) = page_offset(page, page_size);
        let mut b = self.select();
        b.push(" ORDER BY e.created_at, e.id").paging(limit, offset);
        self.query("lore_entry.find_page", b).await
    }

    pub async fn count(&self) -> StoreResult<i64> {
        let stmt = self
            .ctx
            .builder("SELECT COUNT(*) AS n FROM lore_entry")
            .into_statement();
        self.ctx.count("lore_entry.count", &stmt).await
    }

    /// Insert-or-update inside a caller's unit of work, including the
    /// location row. Returns the stored id.
    pub(crate) async fn save_in(uow: &mut UnitOfWork, record: &LoreEntryRecord) -> StoreResult<Uuid> {
        require_text("name", &record.name)?;
        let dialect = uow.dialect();
        let id = if record.id.is_nil() {
            Uuid::new_v4()
        } else {
            record.id
        };
        let now = now_millis();

        let mut exists = StatementBuilder::with_sql(dialect, "SELECT COUNT(*) AS n FROM lore_entry WHERE id = ");
        exists.bind(id);
        let existing = count_in(uow, &exists.into_statement()).await? > 0;

        let stmt = if existing {
            // approved and created_at keep their stored values
            let mut b = StatementBuilder::with_sql(dialect, "UPDATE lore_entry SET name = ");
            b.bind(record.name.as_str())
                .push(", description = ")
                .bind(record.description.as_str())
                .push(", entry_type = ")
                .bind(record.entry_type.as_str())
                .push(", submitted_by = ")
                .bind(record.submitted_by)
                .push(", metadata = ")
                .bind(metadata_json(&record.metadata))
                .push(", updated_at = ")
                .bind(now)
                .push(" WHERE id = ")
                .bind(id);
            b.into_statement()
        } else {
            let mut b = StatementBuilder::with_sql(
                dialect,
                "INSERT INTO lore_entry (id, name, description, entry_type, submitted_by, \
                 approved, metadata, created_at, updated_at) VALUES (",
            );
            b.bind(id)
                .push(", ")
                .bind(record.name.as_str())
                .push(", ")
                .bind(record.description.as_str())
                .push(", ")
                .bind(record.entry_type.as_str())
                .push(", ")
                .bind(record.submitted_by)
                .push(", ")
                .bind(false)
                .push(", ")
                .bind(metadata_json(&record.metadata))
                .push(", ")
                .bind(record.created_at)
                .push(", ")
                .bind(now)
                .push(")");
            b.into_statement()
        };
        uow.execute(&stmt).await?;
        SEARCH
            .refresh(uow, id, &[&record.name, &record.description])
            .await?;

        let mut clear = StatementBuilder::with_sql(dialect, "DELETE FROM lore_location WHERE entry_id = ");
        clear.bind(id);
        uow.execute(&clear.into_statement()).await?;

        if let Some(loc) = &record.location {
            let mut b = StatementBuilder::with_sql(
                dialect,
                "INSERT INTO lore_location (entry_id, world, x, y, z) VALUES (",
            );
            b.bind(id)
                .push(", ")
                .bind(loc.world.as_str())
                .push(", ")
                .bind_list([loc.x, loc.y, loc.z])
                .push(")");
            uow.execute(&b.into_statement()).await?;
        }

        debug!(entry_id = %id, updated = existing, "Saved lore entry");
        Ok(id)
    }
}

#[async_trait]
impl Repository for LoreEntryRepository {
    type Record = LoreEntryRecord;
    type Id = Uuid;

    async fn find_by_id(&self, id: &Uuid) -> StoreResult<Option<LoreEntryRecord>> {
        let mut b = self.select();
        b.push(" WHERE e.id = ").bind(*id);
        let row = self
            .ctx
            .fetch_optional("lore_entry.find_by_id", &b.into_statement(), ENTRY_COLUMNS)
            .await?;
        row.as_ref().map(map_entry).transpose()
    }

    async fn find_all(&self) -> StoreResult<Vec<LoreEntryRecord>> {
        let mut b = self.select();
        b.push(ORDER_BY_NAME);
        self.query("lore_entry.find_all", b).await
    }

    async fn search(&self, text: &str) -> StoreResult<Vec<LoreEntryRecord>> {
        let text = text.trim();
        if text.is_empty() {
            return self.find_all().await;
        }
        let mut b = self.select();
        b.push(" WHERE ")
            .any_contains_ci(&["e.name", "e.description"], text)
            .push(ORDER_BY_NAME);
        self.query("lore_entry.search", b).await
    }

    async fn save(&self, record: &LoreEntryRecord) -> StoreResult<Uuid> {
        let mut uow = self.ctx.begin("lore_entry.save").await?;
        let id = Self::save_in(&mut uow, record).await.during("lore_entry.save")?;
        uow.commit().await.during("lore_entry.save")?;
        Ok(id)
    }

    /// Removes the entry with its location and discovery rows.
    async fn delete(&self, id: &Uuid) -> StoreResult<bool> {
        let dialect = self.ctx.dialect();
        let mut uow = self.ctx.begin("lore_entry.delete").await?;
        let mut deleted = false;
        for sql in [
            "DELETE FROM player_discovery WHERE entry_id = ",
            "DELETE FROM lore_location WHERE entry_id = ",
            "DELETE FROM lore_entry WHERE id = ",
        ] {
            let mut b = StatementBuilder::with_sql(dialect, sql);
            b.bind(*id);
            let outcome = uow
                .execute(&b.into_statement())
                .await
                .during("lore_entry.delete")?;
            deleted = outcome.rows_affected > 0;
        }
        uow.commit().await.during("lore_entry.delete")?;
        Ok(deleted)
    }
}

fn metadata_json(metadata: &BTreeMap<String, String>) -> JsonValue {
    JsonValue::Object(
        metadata
            .iter()
            .map(|(k, v)| (k.clone(), JsonValue::String(v.clone())))
            .collect(),
    )
}

fn metadata_from_json(value: JsonValue) -> StoreResult<BTreeMap<String, String>> {
    match value {
        JsonValue::Null => Ok(BTreeMap::new()),
        JsonValue::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| {
                let v = match v {
                    JsonValue::String(s) => s,
                    other => other.to_string(),
                };
                (k, v)
            })
            .collect()),
        other => Err(StoreError::decode(
            "metadata",
            format!("expected object, found {other}"),
        )),
    }
}

fn map_entry(row: &DbRow) -> StoreResult<LoreEntryRecord> {
    let location = match row.opt_text("world")? {
        Some(world) => Some(LoreLocation {
            world,
            x: row.f64("x")?,
            y: row.f64("y")?,
            z: row.f64("z")?,
        }),
        None => None,
    };

    Ok(LoreEntryRecord {
        id: row.uuid("id")?,
        name: row.text("name")?,
        description: row.text("description")?,
        entry_type: LoreType::from_tag(&row.text("entry_type")?),
        location,
        submitted_by: row.opt_uuid("submitted_by")?,
        approved: row.bool("approved")?,
        created_at: row.timestamp("created_at")?,
        updated_at: row.timestamp("updated_at")?,
        metadata: metadata_from_json(row.json("metadata")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::row::SqlValue;

    #[test]
    fn test_metadata_json_round_trip() {
        let mut metadata = BTreeMap::new();
        metadata.insert("era".to_string(), "first age".to_string());
        let json = metadata_json(&metadata);
        assert_eq!(metadata_from_json(json).unwrap(), metadata);
        assert!(metadata_from_json(JsonValue::Null).unwrap().is_empty());
    }

    #[test]
    fn test_metadata_non_string_values_are_stringified() {
        let parsed = metadata_from_json(serde_json::json!({"level": 3})).unwrap();
        assert_eq!(parsed.get("level").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_map_entry_without_location() {
        let id = Uuid::new_v4();
        let row = DbRow::new(vec![
            ("id", SqlValue::Text(id.to_string())),
            ("name", SqlValue::Text("Ancient Gate".into())),
            ("description", SqlValue::Text("Old".into())),
            ("entry_type", SqlValue::Text("SHIPWRECK".into())),
            ("submitted_by", SqlValue::Null),
            ("approved", SqlValue::Bool(false)),
            ("metadata", SqlValue::Null),
            ("created_at", SqlValue::Int(1_700_000_000_000)),
            ("updated_at", SqlValue::Int(1_700_000_000_000)),
            ("world", SqlValue::Null),
            ("x", SqlValue::Null),
            ("y", SqlValue::Null),
            ("z", SqlValue::Null),
        ]);
        let entry = map_entry(&row).unwrap();
        assert_eq!(entry.id, id);
        assert_eq!(entry.entry_type, LoreType::Generic);
        assert!(entry.location.is_none());
        assert!(entry.submitted_by.is_none());
    }
}
