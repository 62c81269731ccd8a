//! Player discovery and schema ledger records.

use crate::models::LoreLocation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Composite key of a discovery row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveryKey {
    pub player_id: Uuid,
    pub entry_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerDiscoveryRecord {
    pub player_id: Uuid,
    /// References a `lore_entry` row; checked by the repository on save.
    pub entry_id: Uuid,
    pub discovered_at: DateTime<Utc>,
    pub location: Option<LoreLocation>,
}

impl PlayerDiscoveryRecord {
    pub fn new(player_id: Uuid, entry_id: Uuid) -> Self {
        Self {
            player_id,
            entry_id,
            discovered_at: super::now_millis(),
            location: None,
        }
    }

    pub fn at(mut self, location: LoreLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn key(&self) -> DiscoveryKey {
        DiscoveryKey {
            player_id: self.player_id,
            entry_id: self.entry_id,
        }
    }
}

/// One row of the append-only `schema_version` ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaVersionRecord {
    pub version: i64,
    pub description: String,
    pub applied_at: DateTime<Utc>,
}
