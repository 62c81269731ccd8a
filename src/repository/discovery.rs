//! Which players have found which lore entries.
//!
//! There is no foreign key from `player_discovery` to `lore_entry`; the
//! repository checks the entry exists inside the same unit of work.

use super::{Repository, RepositoryContext, count_in, decode_all};
use crate::db::{Column, DbRow, StatementBuilder, UnitOfWork};
use crate::error::{OperationContext, StoreError, StoreResult};
use crate::models::{DiscoveryKey, LoreLocation, PlayerDiscoveryRecord};
use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

const SELECT_DISCOVERY: &str =
    "SELECT d.player_id, d.entry_id, d.discovered_at, d.world, d.x, d.y, d.z FROM player_discovery d";

const DISCOVERY_COLUMNS: &[Column] = &[
    Column::text("player_id"),
    Column::text("entry_id"),
    Column::integer("discovered_at"),
    Column::text("world"),
    Column::float("x"),
    Column::float("y"),
    Column::float("z"),
];

const ORDER_BY_TIME: &str = " ORDER BY d.discovered_at, d.entry_id";

#[derive(Debug, Clone)]
pub struct PlayerDiscoveryRepository {
    ctx: RepositoryContext,
}

impl PlayerDiscoveryRepository {
    pub fn new(ctx: RepositoryContext) -> Self {
        Self { ctx }
    }

    async fn query(
        &self,
        operation: &str,
        builder: StatementBuilder,
    ) -> StoreResult<Vec<PlayerDiscoveryRecord>> {
        let rows = self
            .ctx
            .fetch_all(operation, &builder.into_statement(), DISCOVERY_COLUMNS)
            .await?;
        decode_all(rows, map_discovery)
    }

    pub async fn find_by_player(&self, player_id: &Uuid) -> StoreResult<Vec<PlayerDiscoveryRecord>> {
        let mut b = self.ctx.builder(SELECT_DISCOVERY);
        b.push(" WHERE d.player_id = ").bind(*player_id).push(ORDER_BY_TIME);
        self.query("player_discovery.find_by_player", b).await
    }

    pub async fn has_discovered(&self, player_id: &Uuid, entry_id: &Uuid) -> StoreResult<bool> {
        let mut b = self
            .ctx
            .builder("SELECT COUNT(*) AS n FROM player_discovery WHERE player_id = ");
        b.bind(*player_id).push(" AND entry_id = ").bind(*entry_id);
        let n = self
            .ctx
            .count("player_discovery.has_discovered", &b.into_statement())
            .await?;
        Ok(n > 0)
    }

    /// Number of players who have found `entry_id`.
    pub async fn count_for_entry(&self, entry_id: &Uuid) -> StoreResult<i64> {
        let mut b = self
            .ctx
            .builder("SELECT COUNT(*) AS n FROM player_discovery WHERE entry_id = ");
        b.bind(*entry_id);
        self.ctx
            .count("player_discovery.count_for_entry", &b.into_statement())
            .await
    }

    /// First discovery wins: returns `false` and leaves the stored row alone
    /// if the player already found this entry.
    pub async fn record_discovery(&self, record: &PlayerDiscoveryRecord) -> StoreResult<bool> {
        const OP: &str = "player_discovery.record";
        let mut uow = self.ctx.begin(OP).await?;
        let inserted = Self::record_in(&mut uow, record).await.during(OP)?;
        uow.commit().await.during(OP)?;
        Ok(inserted)
    }

    pub async fn delete_for_player(&self, player_id: &Uuid) -> StoreResult<u64> {
        let mut b = self
            .ctx
            .builder("DELETE FROM player_discovery WHERE player_id = ");
        b.bind(*player_id);
        let outcome = self
            .ctx
            .execute("player_discovery.delete_for_player", &b.into_statement())
            .await?;
        Ok(outcome.rows_affected)
    }

    /// Insert unless the key already exists. The entry must exist.
    pub(crate) async fn record_in(
        uow: &mut UnitOfWork,
        record: &PlayerDiscoveryRecord,
    ) -> StoreResult<bool> {
        ensure_entry_exists(uow, &record.entry_id).await?;
        if key_exists(uow, &record.key()).await? {
            return Ok(false);
        }
        insert(uow, record).await?;
        Ok(true)
    }
}

#[async_trait]
impl Repository for PlayerDiscoveryRepository {
    type Record = PlayerDiscoveryRecord;
    type Id = DiscoveryKey;

    async fn find_by_id(&self, key: &DiscoveryKey) -> StoreResult<Option<PlayerDiscoveryRecord>> {
        let mut b = self.ctx.builder(SELECT_DISCOVERY);
        b.push(" WHERE d.player_id = ")
            .bind(key.player_id)
            .push(" AND d.entry_id = ")
            .bind(key.entry_id);
        let row = self
            .ctx
            .fetch_optional(
                "player_discovery.find_by_id",
                &b.into_statement(),
                DISCOVERY_COLUMNS,
            )
            .await?;
        row.as_ref().map(map_discovery).transpose()
    }

    async fn find_all(&self) -> StoreResult<Vec<PlayerDiscoveryRecord>> {
        let mut b = self.ctx.builder(SELECT_DISCOVERY);
        b.push(ORDER_BY_TIME);
        self.query("player_discovery.find_all", b).await
    }

    /// Matches the name or description of the discovered entry.
    async fn search(&self, text: &str) -> StoreResult<Vec<PlayerDiscoveryRecord>> {
        let text = text.trim();
        if text.is_empty() {
            return self.find_all().await;
        }
        let mut b = self.ctx.builder(SELECT_DISCOVERY);
        b.push(" JOIN lore_entry e ON e.id = d.entry_id WHERE ")
            .any_contains_ci(&["e.name", "e.description"], text)
            .push(ORDER_BY_TIME);
        self.query("player_discovery.search", b).await
    }

    async fn save(&self, record: &PlayerDiscoveryRecord) -> StoreResult<DiscoveryKey> {
        const OP: &str = "player_discovery.save";
        let dialect = self.ctx.dialect();
        let mut uow = self.ctx.begin(OP).await?;

        ensure_entry_exists(&mut uow, &record.entry_id).await.during(OP)?;
        let key = record.key();
        if key_exists(&mut uow, &key).await.during(OP)? {
            let (world, x, y, z) = location_params(record.location.as_ref());
            let mut b = StatementBuilder::with_sql(
                dialect,
                "UPDATE player_discovery SET discovered_at = ",
            );
            b.bind(record.discovered_at)
                .push(", world = ")
                .bind(world)
                .push(", x = ")
                .bind(x)
                .push(", y = ")
                .bind(y)
                .push(", z = ")
                .bind(z)
                .push(" WHERE player_id = ")
                .bind(key.player_id)
                .push(" AND entry_id = ")
                .bind(key.entry_id);
            uow.execute(&b.into_statement()).await.during(OP)?;
        } else {
            insert(&mut uow, record).await.during(OP)?;
        }
        uow.commit().await.during(OP)?;
        Ok(key)
    }

    async fn delete(&self, key: &DiscoveryKey) -> StoreResult<bool> {
        let mut b = self
            .ctx
            .builder("DELETE FROM player_discovery WHERE player_id = ");
        b.bind(key.player_id)
            .push(" AND entry_id = ")
            .bind(key.entry_id);
        let outcome = self
            .ctx
            .execute("player_discovery.delete", &b.into_statement())
            .await?;
        Ok(outcome.rows_affected > 0)
    }
}

async fn ensure_entry_exists(uow: &mut UnitOfWork, entry_id: &Uuid) -> StoreResult<()> {
    let mut b = StatementBuilder::with_sql(
        uow.dialect(),
        "SELECT COUNT(*) AS n FROM lore_entry WHERE id = ",
    );
    b.bind(*entry_id);
    if count_in(uow, &b.into_statement()).await? == 0 {
        return Err(StoreError::constraint(format!(
            "lore entry {entry_id} does not exist"
        )));
    }
    Ok(())
}

async fn key_exists(uow: &mut UnitOfWork, key: &DiscoveryKey) -> StoreResult<bool> {
    let mut b = StatementBuilder::with_sql(
        uow.dialect(),
        "SELECT COUNT(*) AS n FROM player_discovery WHERE player_id = ",
    );
    b.bind(key.player_id)
        .push(" AND entry_id = ")
        .bind(key.entry_id);
    Ok(count_in(uow, &b.into_statement()).await? > 0)
}

async fn insert(uow: &mut UnitOfWork, record: &PlayerDiscoveryRecord) -> StoreResult<()> {
    let (world, x, y, z) = location_params(record.location.as_ref());
    let mut b = StatementBuilder::with_sql(
        uow.dialect(),
        "INSERT INTO player_discovery (player_id, entry_id, discovered_at, world, x, y, z) VALUES (",
    );
    b.bind(record.player_id)
        .push(", ")
        .bind(record.entry_id)
        .push(", ")
        .bind(record.discovered_at)
        .push(", ")
        .bind(world)
        .push(", ")
        .bind(x)
        .push(", ")
        .bind(y)
        .push(", ")
        .bind(z)
        .push(")");
    uow.execute(&b.into_statement()).await?;
    debug!(
        player_id = %record.player_id,
        entry_id = %record.entry_id,
        "Recorded discovery"
    );
    Ok(())
}

fn location_params(
    location: Option<&LoreLocation>,
) -> (Option<String>, Option<f64>, Option<f64>, Option<f64>) {
    match location {
        Some(loc) => (Some(loc.world.clone()), Some(loc.x), Some(loc.y), Some(loc.z)),
        None => (None, None, None, None),
    }
}

fn map_discovery(row: &DbRow) -> StoreResult<PlayerDiscoveryRecord> {
    let location = match row.opt_text("world")? {
        Some(world) => Some(LoreLocation {
            world,
            x: row.f64("x")?,
            y: row.f64("y")?,
            z: row.f64("z")?,
        }),
        None => None,
    };
    Ok(PlayerDiscoveryRecord {
        player_id: row.uuid("player_id")?,
        entry_id: row.uuid("entry_id")?,
        discovered_at: row.timestamp("discovered_at")?,
        location,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_params() {
        let loc = LoreLocation::new("world", 1.0, 64.0, -3.5);
        let (world, x, y, z) = location_params(Some(&loc));
        assert_eq!(world.as_deref(), Some("world"));
        assert_eq!((x, y, z), (Some(1.0), Some(64.0), Some(-3.5)));
        assert_eq!(location_params(None), (None, None, None, None));
    }
}
