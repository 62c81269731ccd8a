//! Data models for the lore store.
//!
//! Records here are persistence-shaped transfer types; callers own the values
//! they pass in and get back, the store owns the stored representation.

pub mod connection;
pub mod discovery;
pub mod item;
pub mod lore;

use chrono::{DateTime, SubsecRound, Utc};

// Re-export commonly used types
pub use connection::{ConnectionInfo, DatabaseType};
pub use discovery::{DiscoveryKey, PlayerDiscoveryRecord, SchemaVersionRecord};
pub use item::{ItemCollectionRecord, ItemPropertiesRecord, MAX_SLUG_LEN, is_valid_slug};
pub use lore::{LoreEntryRecord, LoreLocation, LoreType};

/// The current time at the millisecond precision timestamps are stored at,
/// so a record stamped here compares equal after a round trip.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}
