//! Characters, locations and items tracked for continuity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable kebab-case identifier of an entity, unique within a world.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Normalize generator output to kebab-case.
    ///
    /// Returns `None` when nothing alphanumeric survives.
    pub fn normalize(raw: &str) -> Option<Self> {
        let mut id = String::with_capacity(raw.len());
        let mut pending_dash = false;
        for c in raw.trim().chars().flat_map(char::to_lowercase) {
            if c.is_ascii_alphanumeric() {
                if pending_dash && !id.is_empty() {
                    id.push('-');
                }
                pending_dash = false;
                id.push(c);
            } else {
                pending_dash = true;
            }
        }
        (!id.is_empty()).then_some(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which entity map an entity lives in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    #[default]
    Character,
    Location,
    Item,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Character, EntityKind::Location, EntityKind::Item];

    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Character => "character",
            EntityKind::Location => "location",
            EntityKind::Item => "item",
        }
    }
}

/// A tracked entity.
///
/// The id and name never change once set; the description is refined by
/// later chapters with last-write-wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Chapter that introduced this entity.
    pub first_appearance: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Entity {
    pub fn new(
        id: EntityId,
        kind: EntityKind,
        name: impl Into<String>,
        first_appearance: u32,
    ) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            description: String::new(),
            first_appearance,
            tags: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Replace the description. Blank refinements are ignored.
    pub fn refine(&mut self, description: &str) -> bool {
        let description = description.trim();
        if description.is_empty() || description == self.description {
            return false;
        }
        self.description = description.to_string();
        true
    }
}

/// An entity as introduced (or refined) by one chapter's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntity {
    pub id: EntityId,
    #[serde(default)]
    pub kind: EntityKind,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl NewEntity {
    pub fn into_entity(self, first_appearance: u32) -> Entity {
        Entity::new(self.id, self.kind, self.name, first_appearance).with_description(self.description)
    }
}
