//! Parsing generated chapters into prose and a structured continuity record.
//!
//! The generator embeds a JSON record in an HTML comment at the top of the
//! chapter. A missing or malformed record is not fatal: the caller gets an
//! empty record plus the reason, and keeps the prose.

use crate::world::{
    ChapterMeta, Choice, EntityDelta, EntityId, EntityKind, NewEntity, StoryHealth, WorldState,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContinuityExtractionError {
    #[error("no metadata block found")]
    MissingBlock,

    #[error("metadata block is not valid JSON: {0}")]
    MalformedJson(String),

    #[error("metadata record is invalid: {0}")]
    InvalidRecord(String),
}

/// Result of parsing one generated chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub title: String,
    /// Chapter body with the metadata comment removed.
    pub prose: String,
    pub meta: ChapterMeta,
    /// Set when the record degraded to empty.
    pub error: Option<ContinuityExtractionError>,
}

/// Split a generated chapter into title, prose and metadata.
pub fn extract(markdown: &str, chapter_number: u32) -> Extraction {
    let (meta, error) = match find_block(markdown) {
        Some(block) => match parse_record(block.json) {
            Ok(meta) => (meta, None),
            Err(e) => (ChapterMeta::default(), Some(e)),
        },
        None => (
            ChapterMeta::default(),
            Some(ContinuityExtractionError::MissingBlock),
        ),
    };
    let prose = strip_metadata(markdown);
    let title = extract_title(&prose, chapter_number);

    Extraction {
        title,
        prose,
        meta,
        error,
    }
}

struct Block<'a> {
    start: usize,
    end: usize,
    json: &'a str,
}

/// First HTML comment whose body looks like a JSON object.
fn find_block(markdown: &str) -> Option<Block<'_>> {
    let mut offset = 0;
    while let Some(open) = markdown[offset..].find("<!--") {
        let body_start = offset + open + 4;
        let close = markdown[body_start..].find("-->")?;
        let body_end = body_start + close;
        let body = markdown[body_start..body_end].trim();
        if body.starts_with('{') && body.ends_with('}') {
            return Some(Block {
                start: offset + open,
                end: body_end + 3,
                json: body,
            });
        }
        offset = body_end + 3;
    }
    None
}

/// Remove the metadata comment and surrounding blank lines.
pub fn strip_metadata(markdown: &str) -> String {
    match find_block(markdown) {
        Some(block) => {
            let before = markdown[..block.start].trim_end();
            let after = markdown[block.end..].trim();
            if before.is_empty() {
                after.to_string()
            } else {
                format!("{before}\n\n{after}")
            }
        }
        None => markdown.trim().to_string(),
    }
}

/// First `# ` heading, without any leading "Chapter N:" label.
pub fn extract_title(prose: &str, chapter_number: u32) -> String {
    prose
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("# "))
        .map(|heading| strip_chapter_label(heading.trim()))
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| format!("Chapter {chapter_number}"))
}

fn strip_chapter_label(heading: &str) -> String {
    let has_label = heading
        .get(..8)
        .is_some_and(|p| p.eq_ignore_ascii_case("chapter "));
    if !has_label {
        return heading.to_string();
    }
    let rest = heading[8..].trim_start_matches(|c: char| c.is_ascii_digit());
    if rest.len() == heading.len() - 8 {
        // "Chapter" followed by a word, not a number.
        return heading.to_string();
    }
    rest.trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ':' | '-' | '—' | '.'))
        .trim()
        .to_string()
}

/// Embed a validated record above the prose.
pub fn render_markdown(meta: &ChapterMeta, prose: &str) -> String {
    let json = serde_json::to_string(meta).unwrap_or_else(|_| "{}".to_string());
    // "-->" inside a string would close the comment early.
    let json = json.replace("-->", "--\\u003e");
    format!("<!-- {json} -->\n\n{}\n", prose.trim())
}

// ============================================================================
// Record parsing
// ============================================================================

#[derive(Deserialize)]
struct RawRecord {
    scene_prompt: String,
    summary: String,
    #[serde(default, alias = "characters_in_scene")]
    entities_in_scene: Vec<Value>,
    #[serde(default)]
    new_entities: Vec<Value>,
    #[serde(default)]
    new_characters: Vec<Value>,
    #[serde(default)]
    new_locations: Vec<Value>,
    #[serde(default)]
    new_items: Vec<Value>,
    #[serde(default)]
    choices: Vec<Value>,
    #[serde(default)]
    story_health: Option<StoryHealth>,
}

fn parse_record(json: &str) -> Result<ChapterMeta, ContinuityExtractionError> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| ContinuityExtractionError::MalformedJson(e.to_string()))?;
    let raw: RawRecord = serde_json::from_value(value)
        .map_err(|e| ContinuityExtractionError::InvalidRecord(e.to_string()))?;

    let mut entities_in_scene = Vec::new();
    for id in raw.entities_in_scene.iter().filter_map(Value::as_str) {
        if let Some(id) = EntityId::normalize(id) {
            if !entities_in_scene.contains(&id) {
                entities_in_scene.push(id);
            }
        }
    }

    let tagged = raw
        .new_entities
        .iter()
        .map(|v| (None, v))
        .chain(raw.new_characters.iter().map(|v| (Some(EntityKind::Character), v)))
        .chain(raw.new_locations.iter().map(|v| (Some(EntityKind::Location), v)))
        .chain(raw.new_items.iter().map(|v| (Some(EntityKind::Item), v)));
    let mut seen = BTreeSet::new();
    let new_entities = tagged
        .filter_map(|(kind, value)| parse_entity(value, kind))
        .filter(|e| seen.insert(e.id.clone()))
        .collect();

    Ok(ChapterMeta {
        scene_prompt: raw.scene_prompt.trim().to_string(),
        entities_in_scene,
        new_entities,
        summary: raw.summary.trim().to_string(),
        choices: parse_choices(&raw.choices),
        story_health: raw.story_health,
    })
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn parse_kind(raw: &str) -> Option<EntityKind> {
    match raw.to_ascii_lowercase().as_str() {
        "character" | "person" | "npc" => Some(EntityKind::Character),
        "location" | "place" => Some(EntityKind::Location),
        "item" | "object" | "artifact" => Some(EntityKind::Item),
        _ => None,
    }
}

fn parse_entity(value: &Value, kind: Option<EntityKind>) -> Option<NewEntity> {
    let name = str_field(value, "name");
    let id = str_field(value, "id")
        .or(name)
        .and_then(EntityId::normalize)?;
    let kind = kind
        .or_else(|| {
            str_field(value, "kind")
                .or_else(|| str_field(value, "type"))
                .and_then(parse_kind)
        })
        .unwrap_or_default();

    Some(NewEntity {
        name: name.map(str::to_string).unwrap_or_else(|| id.to_string()),
        description: str_field(value, "description").unwrap_or_default().to_string(),
        id,
        kind,
    })
}

fn parse_choices(values: &[Value]) -> Vec<Choice> {
    let mut choices: Vec<Choice> = Vec::new();
    for (index, value) in values.iter().enumerate() {
        let Some(text) = str_field(value, "text") else {
            continue;
        };
        let id = str_field(value, "id")
            .map(str::to_string)
            .unwrap_or_else(|| format!("choice-{}", index + 1));
        if choices.iter().any(|c| c.id == id) {
            warn!(choice = %id, "dropping duplicate choice id");
            continue;
        }
        choices.push(Choice {
            id,
            text: text.to_string(),
            description: str_field(value, "description").unwrap_or_default().to_string(),
        });
    }
    choices
}

// ============================================================================
// Validation against the world
// ============================================================================

/// A record checked against the world it will be committed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRecord {
    pub meta: ChapterMeta,
    pub delta: EntityDelta,
    /// Scene ids that name no known entity.
    pub dropped_scene_ids: Vec<EntityId>,
    /// New entities that collided with entities from later chapters.
    pub dropped_entities: Vec<EntityId>,
}

/// Check a parsed record against `state` for chapter `chapter`.
///
/// New ids that already exist become description refinements. Ids owned by
/// chapters after `chapter` are left alone. Scene ids that resolve to nothing
/// are dropped so the chapter never references a missing entity.
pub fn validate(meta: ChapterMeta, state: &WorldState, chapter: u32) -> ValidatedRecord {
    let mut delta = EntityDelta::default();
    let mut dropped_entities = Vec::new();

    for new in &meta.new_entities {
        match state.entity(&new.id) {
            None => delta.introduced.push(new.clone()),
            Some(existing) if existing.first_appearance <= chapter => {
                info!(id = %new.id, chapter, "entity id already known, treating as refinement");
                delta.refined.push(new.clone());
            }
            Some(existing) => {
                warn!(
                    id = %new.id,
                    chapter,
                    owner = existing.first_appearance,
                    "entity id belongs to a later chapter, ignoring"
                );
                dropped_entities.push(new.id.clone());
            }
        }
    }

    let resolvable = |id: &EntityId| {
        delta.introduced.iter().any(|e| &e.id == id)
            || state
                .entity(id)
                .is_some_and(|e| e.first_appearance <= chapter)
    };
    let (entities_in_scene, dropped_scene_ids): (Vec<_>, Vec<_>) = meta
        .entities_in_scene
        .iter()
        .cloned()
        .partition(|id| resolvable(id));
    for id in &dropped_scene_ids {
        warn!(%id, chapter, "dropping unknown entity from scene list");
    }

    let new_entities = meta
        .new_entities
        .into_iter()
        .filter(|e| !dropped_entities.contains(&e.id))
        .collect();

    ValidatedRecord {
        meta: ChapterMeta {
            entities_in_scene,
            new_entities,
            ..meta
        },
        delta,
        dropped_scene_ids,
        dropped_entities,
    }
}

/// Log the generator's own assessment of the story.
pub fn log_story_health(meta: &ChapterMeta, chapter: u32) {
    let Some(health) = &meta.story_health else {
        return;
    };
    if health.has_concerns() {
        info!(
            chapter,
            repetitive = health.is_repetitive,
            natural_ending = health.natural_ending_reached,
            needs_fresh_direction = health.needs_fresh_direction,
            "story health concerns"
        );
    }
    if !health.notes.is_empty() {
        info!(chapter, notes = %health.notes, "story health notes");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::Chapter;

    const CHAPTER: &str = r#"<!-- {"scene_prompt": "A lamp on a wet pier", "characters_in_scene": ["Wren", "old-pier"], "summary": "Wren finds a lamp.", "new_characters": [{"id": "Wren", "name": "Wren", "description": "A ferry pilot"}], "new_locations": [{"id": "old-pier", "name": "The Old Pier", "description": "Rotting planks"}], "choices": [{"id": "a", "text": "Light it"}, {"id": "a", "text": "Dup"}, {"id": "b", "text": "Leave it", "description": "Walk home"}], "story_health": {"is_repetitive": false, "notes": "fresh"}} -->

# Chapter 1: The Lamp

Wren walked the pier.
"#;

    #[test]
    fn test_extract_full_record() {
        let extraction = extract(CHAPTER, 1);
        assert!(extraction.error.is_none());
        assert_eq!(extraction.title, "The Lamp");
        assert!(extraction.prose.starts_with("# Chapter 1: The Lamp"));
        assert!(!extraction.prose.contains("<!--"));

        let meta = extraction.meta;
        assert_eq!(meta.scene_prompt, "A lamp on a wet pier");
        assert_eq!(
            meta.entities_in_scene,
            vec![
                EntityId::normalize("wren").unwrap(),
                EntityId::normalize("old-pier").unwrap()
            ]
        );
        assert_eq!(meta.new_entities.len(), 2);
        assert_eq!(meta.new_entities[1].kind, EntityKind::Location);
        assert_eq!(meta.choices.len(), 2);
        assert_eq!(meta.choices[1].description, "Walk home");
        assert_eq!(meta.story_health.unwrap().notes, "fresh");
    }

    #[test]
    fn test_malformed_json_degrades() {
        let extraction = extract("<!-- {\"scene_prompt\": \"x\",} -->\n# Fog\n\nText.", 3);
        assert!(matches!(
            extraction.error,
            Some(ContinuityExtractionError::MalformedJson(_))
        ));
        assert!(extraction.meta.is_empty());
        assert_eq!(extraction.title, "Fog");
        assert_eq!(extraction.prose, "# Fog\n\nText.");
    }

    #[test]
    fn test_missing_block_and_required_keys() {
        let missing = extract("Just prose.", 2);
        assert_eq!(missing.error, Some(ContinuityExtractionError::MissingBlock));
        assert_eq!(missing.title, "Chapter 2");

        let no_summary = extract(r#"<!-- {"scene_prompt": "x"} -->"#, 2);
        assert!(matches!(
            no_summary.error,
            Some(ContinuityExtractionError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_title_variants() {
        assert_eq!(extract_title("# Chapter 12 - Ashes", 12), "Ashes");
        assert_eq!(extract_title("# chapter 3. Rain", 3), "Rain");
        assert_eq!(extract_title("# Chapterhouse", 1), "Chapterhouse");
        assert_eq!(extract_title("# Chapter 4", 4), "Chapter 4");
        assert_eq!(extract_title("## Not a title\nbody", 5), "Chapter 5");
    }

    #[test]
    fn test_render_round_trip() {
        let extraction = extract(CHAPTER, 1);
        let mut meta = extraction.meta.clone();
        meta.summary = "Ends with --> arrow".into();
        let rendered = render_markdown(&meta, &extraction.prose);

        let again = extract(&rendered, 1);
        assert!(again.error.is_none());
        assert_eq!(again.meta, meta);
        assert_eq!(again.prose, extraction.prose);
    }

    #[test]
    fn test_validate_collisions_and_dangling_ids() {
        let mut state = WorldState::new();
        state.apply_delta(
            1,
            &EntityDelta {
                introduced: vec![NewEntity {
                    id: EntityId::normalize("wren").unwrap(),
                    kind: EntityKind::Character,
                    name: "Wren".into(),
                    description: "A ferry pilot".into(),
                }],
                refined: vec![],
            },
        );
        state.append_chapter(Chapter::new(1, "One", ChapterMeta::default())).unwrap();

        let meta = ChapterMeta {
            entities_in_scene: vec![
                EntityId::normalize("wren").unwrap(),
                EntityId::normalize("lamp").unwrap(),
                EntityId::normalize("ghost").unwrap(),
            ],
            new_entities: vec![
                NewEntity {
                    id: EntityId::normalize("wren").unwrap(),
                    kind: EntityKind::Character,
                    name: "Renamed".into(),
                    description: "A pilot in debt".into(),
                },
                NewEntity {
                    id: EntityId::normalize("lamp").unwrap(),
                    kind: EntityKind::Item,
                    name: "Lamp".into(),
                    description: String::new(),
                },
            ],
            ..Default::default()
        };

        let validated = validate(meta, &state, 2);
        assert_eq!(validated.delta.introduced.len(), 1);
        assert_eq!(validated.delta.refined.len(), 1);
        assert_eq!(
            validated.dropped_scene_ids,
            vec![EntityId::normalize("ghost").unwrap()]
        );
        assert_eq!(validated.meta.entities_in_scene.len(), 2);

        // Committing the validated chapter satisfies the scene invariant.
        let chapter = Chapter::new(2, "Two", validated.meta);
        state.apply_delta(2, &validated.delta);
        state.append_chapter(chapter).unwrap();
        assert_eq!(state.entity(&EntityId::normalize("wren").unwrap()).unwrap().name, "Wren");
    }
}
