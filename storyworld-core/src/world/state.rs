//! The mutable world state graph.

use super::chapter::{Chapter, Choice};
use super::entity::{Entity, EntityId, EntityKind, NewEntity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorldError {
    #[error("chapter {0} not found")]
    ChapterNotFound(u32),

    #[error("world has no chapters")]
    NoChapters,

    #[error("chapter number out of order: expected {expected}, got {found}")]
    ChapterOutOfOrder { expected: u32, found: u32 },

    #[error("chapter {chapter} references unknown entity {id}")]
    UnknownEntity { chapter: u32, id: EntityId },

    #[error("chapter {chapter} already has choice {selected} selected")]
    ChoiceAlreadySelected { chapter: u32, selected: String },

    #[error("chapter {chapter} has no choice {choice}")]
    UnknownChoice { chapter: u32, choice: String },

    #[error("chapter {0} offers no choices")]
    NoChoices(u32),
}

/// Entity changes carried by one chapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityDelta {
    /// Entities new to the world, inserted with this chapter as first appearance.
    pub introduced: Vec<NewEntity>,
    /// Existing entities whose description this chapter rewrites.
    pub refined: Vec<NewEntity>,
}

impl EntityDelta {
    pub fn is_empty(&self) -> bool {
        self.introduced.is_empty() && self.refined.is_empty()
    }
}

/// Audit entry for an administrative chapter deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionRecord {
    pub chapter: u32,
    pub title: String,
    pub reason: String,
    #[serde(default)]
    pub removed_entities: Vec<EntityId>,
    pub deleted_at: DateTime<Utc>,
}

/// Everything a world has accumulated: chapters, entities, tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldState {
    /// Incremented once per completed generation.
    #[serde(default)]
    pub tick: u64,
    #[serde(default)]
    pub characters: BTreeMap<EntityId, Entity>,
    #[serde(default)]
    pub locations: BTreeMap<EntityId, Entity>,
    #[serde(default)]
    pub items: BTreeMap<EntityId, Entity>,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audit_log: Vec<DeletionRecord>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn next_chapter_number(&self) -> u32 {
        self.chapters.len() as u32 + 1
    }

    pub fn chapter(&self, number: u32) -> Option<&Chapter> {
        let index = (number as usize).checked_sub(1)?;
        self.chapters.get(index)
    }

    fn chapter_mut(&mut self, number: u32) -> Option<&mut Chapter> {
        let index = (number as usize).checked_sub(1)?;
        self.chapters.get_mut(index)
    }

    pub fn latest_chapter(&self) -> Option<&Chapter> {
        self.chapters.last()
    }

    pub fn entities(&self, kind: EntityKind) -> &BTreeMap<EntityId, Entity> {
        match kind {
            EntityKind::Character => &self.characters,
            EntityKind::Location => &self.locations,
            EntityKind::Item => &self.items,
        }
    }

    fn entities_mut(&mut self, kind: EntityKind) -> &mut BTreeMap<EntityId, Entity> {
        match kind {
            EntityKind::Character => &mut self.characters,
            EntityKind::Location => &mut self.locations,
            EntityKind::Item => &mut self.items,
        }
    }

    /// Find an entity in any of the three maps.
    pub fn entity(&self, id: &EntityId) -> Option<&Entity> {
        EntityKind::ALL
            .iter()
            .find_map(|kind| self.entities(*kind).get(id))
    }

    fn entity_mut(&mut self, id: &EntityId) -> Option<&mut Entity> {
        let kind = self.entity(id)?.kind;
        self.entities_mut(kind).get_mut(id)
    }

    pub fn contains_entity(&self, id: &EntityId) -> bool {
        self.entity(id).is_some()
    }

    pub fn entity_count(&self) -> usize {
        self.characters.len() + self.locations.len() + self.items.len()
    }

    /// Whether any chapter other than `except` lists the entity in its scene.
    pub fn is_referenced_outside(&self, id: &EntityId, except: u32) -> bool {
        self.chapters
            .iter()
            .any(|c| c.number != except && c.references(id))
    }

    /// The world as it stood immediately before chapter `number` was written.
    ///
    /// Chapters from `number` on are dropped along with the entities they
    /// introduced. Descriptions are replayed from the `new_entities` records
    /// of the earlier chapters, so nothing written by chapter `number` or
    /// later survives.
    pub fn snapshot_before(&self, number: u32) -> Result<WorldState, WorldError> {
        if self.chapter(number).is_none() {
            return Err(WorldError::ChapterNotFound(number));
        }
        let earlier = &self.chapters[..(number as usize - 1)];

        let mut descriptions: BTreeMap<&EntityId, &str> = BTreeMap::new();
        for record in earlier.iter().flat_map(|c| &c.meta.new_entities) {
            let description = record.description.trim();
            if description.is_empty() && descriptions.contains_key(&record.id) {
                continue;
            }
            descriptions.insert(&record.id, description);
        }

        let keep = |map: &BTreeMap<EntityId, Entity>| -> BTreeMap<EntityId, Entity> {
            map.iter()
                .filter(|(_, e)| e.first_appearance < number)
                .map(|(id, e)| {
                    let mut entity = e.clone();
                    if let Some(description) = descriptions.get(id) {
                        entity.description = description.to_string();
                    }
                    (id.clone(), entity)
                })
                .collect()
        };

        Ok(WorldState {
            tick: self.tick,
            characters: keep(&self.characters),
            locations: keep(&self.locations),
            items: keep(&self.items),
            chapters: earlier.to_vec(),
            audit_log: Vec::new(),
        })
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Insert introduced entities and apply description refinements.
    ///
    /// Names are never overwritten. Introduced ids that already exist are
    /// treated as refinements.
    pub fn apply_delta(&mut self, chapter: u32, delta: &EntityDelta) {
        for new in &delta.introduced {
            if let Some(existing) = self.entity_mut(&new.id) {
                existing.refine(&new.description);
                continue;
            }
            debug!(id = %new.id, kind = new.kind.name(), chapter, "registering entity");
            self.entities_mut(new.kind)
                .insert(new.id.clone(), new.clone().into_entity(chapter));
        }
        for refinement in &delta.refined {
            if let Some(existing) = self.entity_mut(&refinement.id) {
                if existing.refine(&refinement.description) {
                    debug!(id = %refinement.id, chapter, "refined entity description");
                }
            }
        }
    }

    fn check_scene(&self, chapter: &Chapter) -> Result<(), WorldError> {
        for id in &chapter.meta.entities_in_scene {
            if !self.contains_entity(id) {
                return Err(WorldError::UnknownEntity {
                    chapter: chapter.number,
                    id: id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Append a finished chapter and count the generation.
    ///
    /// Entities must already be registered (see [`Self::apply_delta`]).
    pub fn append_chapter(&mut self, chapter: Chapter) -> Result<(), WorldError> {
        let expected = self.next_chapter_number();
        if chapter.number != expected {
            return Err(WorldError::ChapterOutOfOrder {
                expected,
                found: chapter.number,
            });
        }
        self.check_scene(&chapter)?;
        self.chapters.push(chapter);
        self.tick += 1;
        Ok(())
    }

    /// Replace an existing chapter in place, returning the old record.
    pub fn replace_chapter(&mut self, chapter: Chapter) -> Result<Chapter, WorldError> {
        self.check_scene(&chapter)?;
        let number = chapter.number;
        let slot = self
            .chapter_mut(number)
            .ok_or(WorldError::ChapterNotFound(number))?;
        let old = std::mem::replace(slot, chapter);
        self.tick += 1;
        Ok(old)
    }

    /// Remove entities introduced by chapter `number` that no other chapter
    /// references. Used before that chapter is rewritten.
    pub fn release_entities_of(&mut self, number: u32) -> Vec<Entity> {
        let doomed: Vec<(EntityKind, EntityId)> = EntityKind::ALL
            .iter()
            .flat_map(|kind| {
                self.entities(*kind)
                    .values()
                    .filter(|e| e.first_appearance == number)
                    .filter(|e| !self.is_referenced_outside(&e.id, number))
                    .map(|e| (e.kind, e.id.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();

        doomed
            .into_iter()
            .filter_map(|(kind, id)| self.entities_mut(kind).remove(&id))
            .collect()
    }

    /// Record the reader's pick on a chapter. One-way: a chapter that already
    /// has a selection rejects any further selection.
    pub fn select_choice(
        &mut self,
        number: u32,
        choice_id: &str,
        reasoning: Option<String>,
    ) -> Result<Choice, WorldError> {
        let chapter = self
            .chapter_mut(number)
            .ok_or(WorldError::ChapterNotFound(number))?;
        if let Some(selected) = &chapter.selected_choice_id {
            return Err(WorldError::ChoiceAlreadySelected {
                chapter: number,
                selected: selected.clone(),
            });
        }
        if chapter.meta.choices.is_empty() {
            return Err(WorldError::NoChoices(number));
        }
        let choice = chapter
            .choice(choice_id)
            .cloned()
            .ok_or_else(|| WorldError::UnknownChoice {
                chapter: number,
                choice: choice_id.to_string(),
            })?;

        chapter.selected_choice_id = Some(choice.id.clone());
        chapter.choice_reasoning = reasoning;
        Ok(choice)
    }

    /// Administrative override: drop the final chapter.
    ///
    /// Entities it introduced that no remaining chapter references are removed.
    /// The deletion is recorded in the audit log.
    pub fn delete_latest_chapter(
        &mut self,
        reason: impl Into<String>,
    ) -> Result<(Chapter, DeletionRecord), WorldError> {
        let number = self.latest_chapter().ok_or(WorldError::NoChapters)?.number;
        let removed = self.release_entities_of(number);
        let chapter = self.chapters.pop().ok_or(WorldError::NoChapters)?;

        let record = DeletionRecord {
            chapter: number,
            title: chapter.title.clone(),
            reason: reason.into(),
            removed_entities: removed.into_iter().map(|e| e.id).collect(),
            deleted_at: Utc::now(),
        };
        self.audit_log.push(record.clone());
        Ok((chapter, record))
    }
}
