//! Lore entry records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Category tag of a lore entry, stored as its upper-case name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoreType {
    Landmark,
    City,
    Path,
    Head,
    Item,
    Faction,
    Character,
    Event,
    Generic,
}

impl LoreType {
    pub const ALL: [LoreType; 9] = [
        Self::Landmark,
        Self::City,
        Self::Path,
        Self::Head,
        Self::Item,
        Self::Faction,
        Self::Character,
        Self::Event,
        Self::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Landmark => "LANDMARK",
            Self::City => "CITY",
            Self::Path => "PATH",
            Self::Head => "HEAD",
            Self::Item => "ITEM",
            Self::Faction => "FACTION",
            Self::Character => "CHARACTER",
            Self::Event => "EVENT",
            Self::Generic => "GENERIC",
        }
    }

    /// Decode a stored tag. Unknown tags fall back to `Generic` so that rows
    /// written by newer builds still load.
    pub fn from_tag(tag: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(tag))
            .unwrap_or(Self::Generic)
    }
}

impl std::fmt::Display for LoreType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A point in a named world. Stored in `lore_location` for entries and
/// inline for discoveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoreLocation {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl LoreLocation {
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
        }
    }

    /// Distance on the horizontal (x, z) plane.
    pub fn planar_distance(&self, x: f64, z: f64) -> f64 {
        ((self.x - x).powi(2) + (self.z - z).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoreEntryRecord {
    /// Nil until the entry is first saved.
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub entry_type: LoreType,
    pub location: Option<LoreLocation>,
    /// Player who submitted the entry, if any.
    pub submitted_by: Option<Uuid>,
    /// Only ever set by an explicit approval, never by `save()`.
    pub approved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl LoreEntryRecord {
    /// A new, unsaved and unapproved entry.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        entry_type: LoreType,
    ) -> Self {
        let now = super::now_millis();
        Self {
            id: Uuid::nil(),
            name: name.into(),
            description: description.into(),
            entry_type,
            location: None,
            submitted_by: None,
            approved: false,
            created_at: now,
            updated_at: now,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_location(mut self, location: LoreLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_submitter(mut self, player: Uuid) -> Self {
        self.submitted_by = Some(player);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_persisted(&self) -> bool {
        !self.id.is_nil()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lore_type_tags_round_trip() {
        for t in LoreType::ALL {
            assert_eq!(LoreType::from_tag(t.as_str()), t);
        }
    }

    #[test]
    fn test_unknown_tag_is_generic() {
        assert_eq!(LoreType::from_tag("SHIPWRECK"), LoreType::Generic);
        assert_eq!(LoreType::from_tag("landmark"), LoreType::Landmark);
    }

    #[test]
    fn test_new_entry_is_unapproved_and_unsaved() {
        let entry = LoreEntryRecord::new("Ancient Gate", "A gate", LoreType::Landmark);
        assert!(!entry.approved);
        assert!(!entry.is_persisted());
        assert!(entry.metadata.is_empty());
    }

    #[test]
    fn test_planar_distance_ignores_height() {
        let loc = LoreLocation::new("overworld", 3.0, 200.0, 4.0);
        assert_eq!(loc.planar_distance(0.0, 0.0), 5.0);
    }

    #[test]
    fn test_serde_uses_upper_case_tags() {
        let json = serde_json::to_string(&LoreType::Landmark).unwrap();
        assert_eq!(json, "\"LANDMARK\"");
    }
}
