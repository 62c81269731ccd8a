//! Item property and collection records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemPropertiesRecord {
    /// `None` until the store assigns an id on first save.
    pub id: Option<i64>,
    pub display_name: String,
    /// Game material/item type name, e.g. `DIAMOND_SWORD`.
    pub item_type: String,
    pub custom_model_data: Option<i64>,
    pub lore_lines: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ItemPropertiesRecord {
    pub fn new(display_name: impl Into<String>, item_type: impl Into<String>) -> Self {
        Self {
            id: None,
            display_name: display_name.into(),
            item_type: item_type.into(),
            custom_model_data: None,
            lore_lines: Vec::new(),
            created_at: super::now_millis(),
        }
    }

    pub fn with_custom_model_data(mut self, value: i64) -> Self {
        self.custom_model_data = Some(value);
        self
    }

    pub fn with_lore_line(mut self, line: impl Into<String>) -> Self {
        self.lore_lines.push(line.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemCollectionRecord {
    /// Human-chosen slug, e.g. `ancient-relics`.
    pub id: String,
    pub name: String,
    pub description: String,
    pub theme: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ItemCollectionRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, theme: impl Into<String>) -> Self {
        let now = super::now_millis();
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            theme: theme.into(),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Maximum slug length accepted for collection ids.
pub const MAX_SLUG_LEN: usize = 64;

/// Slugs are 1..=64 characters of `[a-z0-9_-]`.
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug.len() <= MAX_SLUG_LEN
        && slug
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
}
