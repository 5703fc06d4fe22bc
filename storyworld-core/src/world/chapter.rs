//! Chapters, their structured metadata, and reader choices.

use super::entity::{EntityId, NewEntity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A branch the reader may pick at the end of a chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    /// Unique within its chapter.
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// The generator's own read on where the story is heading. Logged only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryHealth {
    #[serde(default)]
    pub is_repetitive: bool,
    #[serde(default)]
    pub natural_ending_reached: bool,
    #[serde(default)]
    pub needs_fresh_direction: bool,
    #[serde(default)]
    pub notes: String,
}

impl StoryHealth {
    pub fn has_concerns(&self) -> bool {
        self.is_repetitive || self.natural_ending_reached || self.needs_fresh_direction
    }
}

/// Structured record embedded in a chapter's markdown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterMeta {
    #[serde(default)]
    pub scene_prompt: String,
    #[serde(default)]
    pub entities_in_scene: Vec<EntityId>,
    #[serde(default)]
    pub new_entities: Vec<NewEntity>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_health: Option<StoryHealth>,
}

impl ChapterMeta {
    pub fn is_empty(&self) -> bool {
        self.scene_prompt.is_empty()
            && self.summary.is_empty()
            && self.entities_in_scene.is_empty()
            && self.new_entities.is_empty()
            && self.choices.is_empty()
    }
}

/// Where a chapter's scene image lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneImage {
    /// Path relative to the world directory.
    pub path: String,
    pub cache_key: String,
    pub provider: String,
    pub model: String,
}

/// One generated narrative unit.
///
/// The prose lives in `chapters/<filename>`; this record carries everything
/// else. Number and position never change once assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub number: u32,
    pub title: String,
    pub filename: String,
    #[serde(flatten)]
    pub meta: ChapterMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_choice_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice_reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<SceneImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_model: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl Chapter {
    pub fn new(number: u32, title: impl Into<String>, meta: ChapterMeta) -> Self {
        Self {
            number,
            title: title.into(),
            filename: Self::filename_for(number),
            meta,
            selected_choice_id: None,
            choice_reasoning: None,
            image: None,
            text_model: None,
            generated_at: Utc::now(),
        }
    }

    pub fn filename_for(number: u32) -> String {
        format!("chapter-{number:04}.md")
    }

    pub fn choice(&self, id: &str) -> Option<&Choice> {
        self.meta.choices.iter().find(|c| c.id == id)
    }

    pub fn selected_choice(&self) -> Option<&Choice> {
        self.selected_choice_id.as_deref().and_then(|id| self.choice(id))
    }

    /// Whether this chapter references the entity in its scene list.
    pub fn references(&self, id: &EntityId) -> bool {
        self.meta.entities_in_scene.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter_with_choices() -> Chapter {
        Chapter::new(
            3,
            "Salt and Signal",
            ChapterMeta {
                choices: vec![
                    Choice {
                        id: "follow".into(),
                        text: "Follow the lamp".into(),
                        description: String::new(),
                    },
                    Choice {
                        id: "wait".into(),
                        text: "Wait for dawn".into(),
                        description: String::new(),
                    },
                ],
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_filename() {
        assert_eq!(Chapter::filename_for(7), "chapter-0007.md");
        assert_eq!(chapter_with_choices().filename, "chapter-0003.md");
    }

    #[test]
    fn test_selected_choice() {
        let mut chapter = chapter_with_choices();
        assert!(chapter.selected_choice().is_none());
        chapter.selected_choice_id = Some("wait".into());
        assert_eq!(chapter.selected_choice().unwrap().text, "Wait for dawn");
    }

    #[test]
    fn test_meta_flattened_in_json() {
        let chapter = chapter_with_choices();
        let value = serde_json::to_value(&chapter).unwrap();
        assert_eq!(value["choices"][0]["id"], "follow");
        assert!(value.get("meta").is_none());
        assert!(value.get("selected_choice_id").is_none());

        let back: Chapter = serde_json::from_value(value).unwrap();
        assert_eq!(back, chapter);
    }

    #[test]
    fn test_story_health_concerns() {
        assert!(!StoryHealth::default().has_concerns());
        let health = StoryHealth {
            is_repetitive: true,
            ..Default::default()
        };
        assert!(health.has_concerns());
    }
}
