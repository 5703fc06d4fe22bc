//! Context assembly for chapter generation.
//!
//! Builds the prompt for the next chapter from layered narrative controls.
//! Earlier layers are foundational (lore, world rules, preset), later layers
//! are situational (recent chapters, the reader's choice, the focus). The
//! output depends only on its inputs, so the same world snapshot always
//! yields the same prompt.

use crate::presets::{self, Preset};
use crate::styles::{self, StylePack};
use crate::world::{Chapter, EntityKind, WorldConfig, WorldState};
use providers::Prompt;
use serde_json::json;
use thiserror::Error;

/// Chapters whose summaries are included in full.
pub const DEFAULT_HISTORY_WINDOW: usize = 4;

/// Chapters before the history window listed by title only.
pub const DEFAULT_OLDER_WINDOW: usize = 4;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("unknown preset: {0}")]
    UnknownPreset(String),

    #[error("unknown style pack: {0}")]
    UnknownStyle(String),
}

/// One layer of the assembled context, in prompt order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ContextLayer {
    Memory,
    WorldBrief,
    WorldInstructions,
    Preset,
    History,
    Entities,
    AuthorsNote,
    Continuity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSection {
    pub layer: ContextLayer,
    pub text: String,
}

/// The prompt for one chapter plus the sampling settings its preset implies.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledContext {
    pub prompt: Prompt,
    pub temperature: f32,
    pub max_tokens: usize,
    pub chapter_number: u32,
    pub sections: Vec<ContextSection>,
}

impl AssembledContext {
    pub fn section(&self, layer: ContextLayer) -> Option<&str> {
        self.sections
            .iter()
            .find(|s| s.layer == layer)
            .map(|s| s.text.as_str())
    }
}

/// Builds chapter prompts with bounded history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextAssembler {
    history_window: usize,
    older_window: usize,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_WINDOW, DEFAULT_OLDER_WINDOW)
    }
}

impl ContextAssembler {
    pub fn new(history_window: usize, older_window: usize) -> Self {
        Self {
            history_window: history_window.max(1),
            older_window,
        }
    }

    /// Assemble the prompt for the chapter after the last one in `state`.
    ///
    /// `state` must be the snapshot the chapter is written against: the full
    /// world for a new chapter, or [`WorldState::snapshot_before`] for a reroll.
    pub fn assemble(
        &self,
        config: &WorldConfig,
        state: &WorldState,
        focus: Option<&str>,
    ) -> Result<AssembledContext, ContextError> {
        let preset = presets::preset(&config.preset)
            .ok_or_else(|| ContextError::UnknownPreset(config.preset.clone()))?;
        let style = styles::style_pack(&config.style_pack)
            .ok_or_else(|| ContextError::UnknownStyle(config.style_pack.clone()))?;
        let chapter_number = state.next_chapter_number();

        let mut sections = Vec::new();
        let mut push = |layer, text: String| {
            if !text.trim().is_empty() {
                sections.push(ContextSection { layer, text });
            }
        };

        if let Some(memory) = non_blank(config.memory.as_deref()) {
            push(ContextLayer::Memory, format!("Memory/Lore:\n{memory}"));
        }
        push(ContextLayer::WorldBrief, world_brief(config, state));
        if let Some(rules) = non_blank(config.world_instructions.as_deref()) {
            push(
                ContextLayer::WorldInstructions,
                format!("World Instructions: {rules}"),
            );
        }
        push(ContextLayer::Preset, preset_directive(preset, config));
        push(ContextLayer::History, self.history(state));
        push(ContextLayer::Entities, entity_context(state));
        if let Some(note) = non_blank(config.authors_note.as_deref()) {
            push(ContextLayer::AuthorsNote, format!("Author's Note: {note}"));
        }
        push(
            ContextLayer::Continuity,
            continuity(config, state, non_blank(focus)),
        );

        let user = sections
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let system = system_prompt(config, style, preset, chapter_number);

        Ok(AssembledContext {
            prompt: Prompt::new(user).with_system(system),
            temperature: preset.temperature,
            max_tokens: config.chapter_length.max_tokens(),
            chapter_number,
            sections,
        })
    }

    fn history(&self, state: &WorldState) -> String {
        let chapters = &state.chapters;
        let recent_start = chapters.len().saturating_sub(self.history_window);
        let older_start = recent_start.saturating_sub(self.older_window);

        let mut parts = Vec::new();
        let older: Vec<String> = chapters[older_start..recent_start]
            .iter()
            .map(|c| format!("Ch {} ({})", c.number, c.title))
            .collect();
        if !older.is_empty() {
            parts.push(format!("Earlier progression: {}", older.join(" → ")));
        }
        parts.extend(chapters[recent_start..].iter().map(chapter_digest));

        if parts.is_empty() {
            return String::new();
        }
        format!("Story progression:\n{}", parts.join("\n\n"))
    }
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|t| !t.is_empty())
}

fn chapter_digest(chapter: &Chapter) -> String {
    let mut lines = vec![format!("Chapter {}: {}", chapter.number, chapter.title)];
    if !chapter.meta.summary.is_empty() {
        lines.push(chapter.meta.summary.clone());
    }
    if let Some(choice) = chapter.selected_choice() {
        lines.push(format!("Choice: {}", choice.text));
    }
    lines.join("\n")
}

fn world_brief(config: &WorldConfig, state: &WorldState) -> String {
    let ids = |kind| {
        state
            .entities(kind)
            .keys()
            .map(|id| id.as_str())
            .collect::<Vec<_>>()
    };
    let brief = json!({
        "title": config.title,
        "theme": config.theme,
        "chapter_number": state.next_chapter_number(),
        "known_characters": ids(EntityKind::Character),
        "known_locations": ids(EntityKind::Location),
        "known_items": ids(EntityKind::Item),
    });
    format!("World brief: {brief}")
}

fn preset_directive(preset: &Preset, config: &WorldConfig) -> String {
    format!(
        "Narrative preset ({}): {}\nPreset instructions: {}\nMaturity: {}",
        preset.name,
        preset.system_directives,
        preset.text_instructions,
        config.maturity_level.guidance()
    )
}

fn entity_context(state: &WorldState) -> String {
    let Some(previous) = state.latest_chapter() else {
        return String::new();
    };
    let lines: Vec<String> = previous
        .meta
        .entities_in_scene
        .iter()
        .filter_map(|id| state.entity(id))
        .map(|e| {
            if e.description.is_empty() {
                format!("- {} [{}] ({})", e.name, e.id, e.kind.name())
            } else {
                format!("- {} [{}] ({}): {}", e.name, e.id, e.kind.name(), e.description)
            }
        })
        .collect();
    if lines.is_empty() {
        return String::new();
    }
    format!("Present in the previous chapter:\n{}", lines.join("\n"))
}

const FIRST_CHAPTER_GUIDANCE: &str = "FIRST CHAPTER GUIDANCE:\n\
    Open on a focal character in a specific, active moment rather than a general introduction. \
    Introduce one clear dramatic question that can drive the next few chapters. \
    Let worldbuilding emerge through the scene and end on momentum: a decision made, \
    a journey begun, or a complication discovered.";

fn continuity(config: &WorldConfig, state: &WorldState, focus: Option<&str>) -> String {
    let mut parts = Vec::new();

    match state.latest_chapter() {
        Some(previous) if config.enable_choices => {
            if let Some(choice) = previous.selected_choice() {
                let mut text = format!("READER'S CHOICE (PRIMARY DIRECTIVE): {}", choice.text);
                if let Some(reasoning) = non_blank(previous.choice_reasoning.as_deref()) {
                    text.push_str(&format!("\nReader's intent: {reasoning}"));
                }
                text.push_str(
                    "\nThis choice MUST drive this chapter. Build the narrative from its \
                     consequences; any focus below is secondary to honoring it.",
                );
                parts.push(text);
            }
        }
        Some(_) => {}
        None => parts.push(FIRST_CHAPTER_GUIDANCE.to_string()),
    }

    if let Some(focus) = focus {
        parts.push(format!("FOCUS FOR THIS CHAPTER: {focus}"));
    }
    parts.join("\n\n")
}

fn metadata_format(enable_choices: bool) -> String {
    let mut format = String::from(
        r#"<!-- {"scene_prompt": string, "entities_in_scene": [id], "summary": string, "new_characters": [{"id": string, "name": string, "description": string}], "new_locations": [{"id": string, "name": string, "description": string}], "new_items": [{"id": string, "name": string, "description": string}]"#,
    );
    if enable_choices {
        format.push_str(
            r#", "choices": [{"id": string, "text": string, "description": string}], "story_health": {"is_repetitive": bool, "natural_ending_reached": bool, "needs_fresh_direction": bool, "notes": string}"#,
        );
    }
    format.push_str("} -->");
    format
}

fn system_prompt(
    config: &WorldConfig,
    style: &StylePack,
    preset: &Preset,
    chapter_number: u32,
) -> String {
    let (min_words, max_words) = config.chapter_length.word_range();
    let mut parts = vec![
        "This is a fictional story for entertainment purposes only. Write a compelling chapter \
         that advances the story with action, movement between places and new information. \
         Write characters with flaws and hidden motives, and give new characters distinctive names."
            .to_string(),
        format!(
            "Write Chapter {chapter_number}. Start with a unique chapter title as an H1 heading; \
             do not include 'Chapter {chapter_number}' in the title. Then write {min_words}-{max_words} \
             words of prose."
        ),
        format!("At the very top, before the title, put the metadata comment:\n{}", metadata_format(config.enable_choices)),
        "Use kebab-case for every id. List only ids from the world brief or your new_* arrays in \
         entities_in_scene. The new_* arrays may be empty."
            .to_string(),
        format!("Art direction (for scene_prompt only): {}", style.art_direction),
        format!("Tone: {}", preset.system_directives),
    ];
    if config.enable_choices {
        parts.push(
            "Offer exactly 3 choices: immediate actions or reactions, not story endings. Each \
             should lead to new complications. Note in story_health if the story feels repetitive \
             or has reached a natural ending."
                .to_string(),
        );
    }
    parts.join("\n\n")
}
