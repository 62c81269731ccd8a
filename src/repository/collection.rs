use super::{Repository, RepositoryContext, SearchColumns, count_in, decode_all, require_text};
use crate::db::{Column, DbRow, StatementBuilder};
use crate::error::{OperationContext, StoreError, StoreResult};
use crate::models::{ItemCollectionRecord, MAX_SLUG_LEN, is_valid_slug, now_millis};
use async_trait::async_trait;
use tracing::{debug, info};

const SELECT_COLLECTION: &str =
    "SELECT id, name, description, theme, active, created_at, updated_at FROM item_collection";

const COLLECTION_COLUMNS: &[Column] = &[
    Column::text("id"),
    Column::text("name"),
    Column::text("description"),
    Column::text("theme"),
    Column::boolean("active"),
    Column::integer("created_at"),
    Column::integer("updated_at"),
];

pub(crate) const SEARCH: SearchColumns = SearchColumns {
    table: "item_collection",
    key: Column::text("id"),
    sources: &["name", "description"],
};

#[derive(Debug, Clone)]
pub struct ItemCollectionRepository {
    ctx: RepositoryContext,
}

impl ItemCollectionRepository {
    pub fn new(ctx: RepositoryContext) -> Self {
        Self { ctx }
    }

    async fn query(
        &self,
        operation: &str,
        builder: StatementBuilder,
    ) -> StoreResult<Vec<ItemCollectionRecord>> {
        let rows = self
            .ctx
            .fetch_all(operation, &builder.into_statement(), COLLECTION_COLUMNS)
            .await?;
        decode_all(rows, map_collection)
    }

    pub async fn find_active(&self) -> StoreResult<Vec<ItemCollectionRecord>> {
        let mut b = self.ctx.builder(SELECT_COLLECTION);
        b.push(" WHERE active = ").bind(true).push(" ORDER BY name, id");
        self.query("item_collection.find_active", b).await
    }

    pub async fn find_by_theme(&self, theme: &str) -> StoreResult<Vec<ItemCollectionRecord>> {
        let mut b = self.ctx.builder(SELECT_COLLECTION);
        b.push(" WHERE theme = ").bind(theme).push(" ORDER BY name, id");
        self.query("item_collection.find_by_theme", b).await
    }

    /// Returns `false` when no collection has this id.
    pub async fn set_active(&self, id: &str, active: bool) -> StoreResult<bool> {
        let mut b = self.ctx.builder("UPDATE item_collection SET active = ");
        b.bind(active)
            .push(", updated_at = ")
            .bind(now_millis())
            .push(" WHERE id = ")
            .bind(id);
        let outcome = self
            .ctx
            .execute("item_collection.set_active", &b.into_statement())
            .await?;
        let found = outcome.rows_affected > 0;
        if found {
            info!(collection = id, active, "Item collection toggled");
        }
        Ok(found)
    }
}

#[async_trait]
impl Repository for ItemCollectionRepository {
    type Record = ItemCollectionRecord;
    type Id = String;

    async fn find_by_id(&self, id: &String) -> StoreResult<Option<ItemCollectionRecord>> {
        let mut b = self.ctx.builder(SELECT_COLLECTION);
        b.push(" WHERE id = ").bind(id);
        let row = self
            .ctx
            .fetch_optional(
                "item_collection.find_by_id",
                &b.into_statement(),
                COLLECTION_COLUMNS,
            )
            .await?;
        row.as_ref().map(map_collection).transpose()
    }

    async fn find_all(&self) -> StoreResult<Vec<ItemCollectionRecord>> {
        let mut b = self.ctx.builder(SELECT_COLLECTION);
        b.push(" ORDER BY name, id");
        self.query("item_collection.find_all", b).await
    }

    async fn search(&self, text: &str) -> StoreResult<Vec<ItemCollectionRecord>> {
        let text = text.trim();
        if text.is_empty() {
            return self.find_all().await;
        }
        let mut b = self.ctx.builder(SELECT_COLLECTION);
        b.push(" WHERE ")
            .any_contains_ci(&["name", "description"], text)
            .push(" ORDER BY name, id");
        self.query("item_collection.search", b).await
    }

    async fn save(&self, record: &ItemCollectionRecord) -> StoreResult<String> {
        const OP: &str = "item_collection.save";
        if !is_valid_slug(&record.id) {
            return Err(StoreError::constraint(format!(
                "collection id '{}' must be 1-{} characters of a-z, 0-9, '-' or '_'",
                record.id, MAX_SLUG_LEN
            )));
        }
        require_text("name", &record.name)?;

        let dialect = self.ctx.dialect();
        let now = now_millis();
        let mut uow = self.ctx.begin(OP).await?;

        let mut exists = StatementBuilder::with_sql(
            dialect,
            "SELECT COUNT(*) AS n FROM item_collection WHERE id = ",
        );
        exists.bind(record.id.as_str());
        let existing = count_in(&mut uow, &exists.into_statement()).await.during(OP)? > 0;

        let stmt = if existing {
            let mut b = StatementBuilder::with_sql(dialect, "UPDATE item_collection SET name = ");
            b.bind(record.name.as_str())
                .push(", description = ")
                .bind(record.description.as_str())
                .push(", theme = ")
                .bind(record.theme.as_str())
                .push(", active = ")
                .bind(record.active)
                .push(", updated_at = ")
                .bind(now)
                .push(" WHERE id = ")
                .bind(record.id.as_str());
            b.into_statement()
        } else {
            let mut b = StatementBuilder::with_sql(
                dialect,
                "INSERT INTO item_collection (id, name, description, theme, active, \
                 created_at, updated_at) VALUES (",
            );
            b.bind(record.id.as_str())
                .push(", ")
                .bind(record.name.as_str())
                .push(", ")
                .bind(record.description.as_str())
                .push(", ")
                .bind(record.theme.as_str())
                .push(", ")
                .bind(record.active)
                .push(", ")
                .bind(record.created_at)
                .push(", ")
                .bind(now)
                .push(")");
            b.into_statement()
        };
        uow.execute(&stmt).await.during(OP)?;
        SEARCH
            .refresh(&mut uow, record.id.as_str(), &[&record.name, &record.description])
            .await
            .during(OP)?;
        uow.commit().await.during(OP)?;

        debug!(collection = %record.id, updated = existing, "Saved item collection");
        Ok(record.id.clone())
    }

    async fn delete(&self, id: &String) -> StoreResult<bool> {
        let mut b = self.ctx.builder("DELETE FROM item_collection WHERE id = ");
        b.bind(id);
        let outcome = self
            .ctx
            .execute("item_collection.delete", &b.into_statement())
            .await?;
        Ok(outcome.rows_affected > 0)
    }
}

fn map_collection(row: &DbRow) -> StoreResult<ItemCollectionRecord> {
    Ok(ItemCollectionRecord {
        id: row.text("id")?,
        name: row.text("name")?,
        description: row.text("description")?,
        theme: row.text("theme")?,
        active: row.bool("active")?,
        created_at: row.timestamp("created_at")?,
        updated_at: row.timestamp("updated_at")?,
    })
}
