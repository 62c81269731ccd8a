use super::{
    Repository, RepositoryContext, SearchColumns, count_in, decode_all, json_string_list,
    require_text, string_list_json,
};
use crate::db::{Column, DbRow, StatementBuilder};
use crate::error::{OperationContext, StoreResult};
use crate::models::ItemPropertiesRecord;
use async_trait::async_trait;
use tracing::debug;

const SELECT_ITEM: &str = "SELECT id, display_name, item_type, custom_model_data, lore_lines, \
     created_at FROM item_properties";

const ITEM_COLUMNS: &[Column] = &[
    Column::integer("id"),
    Column::text("display_name"),
    Column::text("item_type"),
    Column::integer("custom_model_data"),
    Column::json("lore_lines"),
    Column::integer("created_at"),
];

pub(crate) const SEARCH: SearchColumns = SearchColumns {
    table: "item_properties",
    key: Column::integer("id"),
    sources: &["display_name", "item_type"],
};

#[derive(Debug, Clone)]
pub struct ItemPropertiesRepository {
    ctx: RepositoryContext,
}

impl ItemPropertiesRepository {
    pub fn new(ctx: RepositoryContext) -> Self {
        Self { ctx }
    }

    async fn query(
        &self,
        operation: &str,
        builder: StatementBuilder,
    ) -> StoreResult<Vec<ItemPropertiesRecord>> {
        let rows = self
            .ctx
            .fetch_all(operation, &builder.into_statement(), ITEM_COLUMNS)
            .await?;
        decode_all(rows, map_item)
    }

    pub async fn find_by_item_type(&self, item_type: &str) -> StoreResult<Vec<ItemPropertiesRecord>> {
        let mut b = self.ctx.builder(SELECT_ITEM);
        b.push(" WHERE item_type = ")
            .bind(item_type)
            .push(" ORDER BY id");
        self.query("item_properties.find_by_item_type", b).await
    }

    /// Resource-pack model lookup.
    pub async fn find_by_custom_model_data(
        &self,
        custom_model_data: i64,
    ) -> StoreResult<Vec<ItemPropertiesRecord>> {
        let mut b = self.ctx.builder(SELECT_ITEM);
        b.push(" WHERE custom_model_data = ")
            .bind(custom_model_data)
            .push(" ORDER BY id");
        self.query("item_properties.find_by_custom_model_data", b)
            .await
    }
}

#[async_trait]
impl Repository for ItemPropertiesRepository {
    type Record = ItemPropertiesRecord;
    type Id = i64;

    async fn find_by_id(&self, id: &i64) -> StoreResult<Option<ItemPropertiesRecord>> {
        let mut b = self.ctx.builder(SELECT_ITEM);
        b.push(" WHERE id = ").bind(*id);
        let row = self
            .ctx
            .fetch_optional("item_properties.find_by_id", &b.into_statement(), ITEM_COLUMNS)
            .await?;
        row.as_ref().map(map_item).transpose()
    }

    async fn find_all(&self) -> StoreResult<Vec<ItemPropertiesRecord>> {
        let mut b = self.ctx.builder(SELECT_ITEM);
        b.push(" ORDER BY id");
        self.query("item_properties.find_all", b).await
    }

    /// Matches display name or item type.
    async fn search(&self, text: &str) -> StoreResult<Vec<ItemPropertiesRecord>> {
        let text = text.trim();
        if text.is_empty() {
            return self.find_all().await;
        }
        let mut b = self.ctx.builder(SELECT_ITEM);
        b.push(" WHERE ")
            .any_contains_ci(&["display_name", "item_type"], text)
            .push(" ORDER BY id");
        self.query("item_properties.search", b).await
    }

    /// A record whose id no longer exists is stored under a fresh id.
    async fn save(&self, record: &ItemPropertiesRecord) -> StoreResult<i64> {
        const OP: &str = "item_properties.save";
        require_text("display_name", &record.display_name)?;
        require_text("item_type", &record.item_type)?;

        let dialect = self.ctx.dialect();
        let mut uow = self.ctx.begin(OP).await?;

        let existing = match record.id {
            Some(id) => {
                let mut b = StatementBuilder::with_sql(
                    dialect,
                    "SELECT COUNT(*) AS n FROM item_properties WHERE id = ",
                );
                b.bind(id);
                (count_in(&mut uow, &b.into_statement()).await.during(OP)? > 0).then_some(id)
            }
            None => None,
        };

        let id = match existing {
            Some(id) => {
                let mut b = StatementBuilder::with_sql(dialect, "UPDATE item_properties SET display_name = ");
                b.bind(record.display_name.as_str())
                    .push(", item_type = ")
                    .bind(record.item_type.as_str())
                    .push(", custom_model_data = ")
                    .bind(record.custom_model_data)
                    .push(", lore_lines = ")
                    .bind(string_list_json(&record.lore_lines))
                    .push(" WHERE id = ")
                    .bind(id);
                uow.execute(&b.into_statement()).await.during(OP)?;
                id
            }
            None => {
                let mut b = StatementBuilder::with_sql(
                    dialect,
                    "INSERT INTO item_properties (display_name, item_type, custom_model_data, \
                     lore_lines, created_at) VALUES (",
                );
                b.bind(record.display_name.as_str())
                    .push(", ")
                    .bind(record.item_type.as_str())
                    .push(", ")
                    .bind(record.custom_model_data)
                    .push(", ")
                    .bind(string_list_json(&record.lore_lines))
                    .push(", ")
                    .bind(record.created_at)
                    .push(")");
                uow.insert_returning_id(&b.into_statement()).await.during(OP)?
            }
        };
        SEARCH
            .refresh(&mut uow, id, &[&record.display_name, &record.item_type])
            .await
            .during(OP)?;

        uow.commit().await.during(OP)?;
        debug!(item_id = id, updated = existing.is_some(), "Saved item properties");
        Ok(id)
    }

    async fn delete(&self, id: &i64) -> StoreResult<bool> {
        let mut b = self.ctx.builder("DELETE FROM item_properties WHERE id = ");
        b.bind(*id);
        let outcome = self
            .ctx
            .execute("item_properties.delete", &b.into_statement())
            .await?;
        Ok(outcome.rows_affected > 0)
    }
}

fn map_item(row: &DbRow) -> StoreResult<ItemPropertiesRecord> {
    Ok(ItemPropertiesRecord {
        id: Some(row.i64("id")?),
        display_name: row.text("display_name")?,
        item_type: row.text("item_type")?,
        custom_model_data: row.opt_i64("custom_model_data")?,
        lore_lines: json_string_list("lore_lines", row.json("lore_lines")?)?,
        created_at: row.timestamp("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::row::SqlValue;

    #[test]
    fn test_map_item() {
        let row = DbRow::new(vec![
            ("id", SqlValue::Int(7)),
            ("display_name", SqlValue::Text("Dragonfang".into())),
            ("item_type", SqlValue::Text("DIAMOND_SWORD".into())),
            ("custom_model_data", SqlValue::Null),
            ("lore_lines", SqlValue::Json(serde_json::json!(["Forged in fire"]))),
            ("created_at", SqlValue::Int(0)),
        ]);
        let item = map_item(&row).unwrap();
        assert_eq!(item.id, Some(7));
        assert_eq!(item.custom_model_data, None);
        assert_eq!(item.lore_lines, vec!["Forged in fire".to_string()]);
    }
}
