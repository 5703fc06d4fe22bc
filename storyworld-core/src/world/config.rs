//! Per-world configuration.

use crate::presets::{ChapterLength, MaturityLevel, DEFAULT_PRESET};
use crate::slug::WorldSlug;
use crate::styles::DEFAULT_STYLE;
use providers::AspectRatio;
use serde::{Deserialize, Serialize};

/// Settings a world is created with.
///
/// Replaced wholesale on edit; generation never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldConfig {
    pub title: String,
    pub slug: WorldSlug,
    pub theme: String,

    /// Style pack key (art direction).
    #[serde(default = "default_style")]
    pub style_pack: String,

    /// Narrative preset key.
    #[serde(default = "default_preset")]
    pub preset: String,

    #[serde(default)]
    pub maturity_level: MaturityLevel,

    #[serde(default)]
    pub chapter_length: ChapterLength,

    #[serde(default = "default_text_provider")]
    pub text_provider: String,
    /// `None` uses the provider's default model.
    #[serde(default)]
    pub text_model: Option<String>,

    #[serde(default = "default_image_provider")]
    pub image_provider: String,
    #[serde(default)]
    pub image_model: Option<String>,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,

    /// Ask for reader choices at the end of each chapter.
    #[serde(default)]
    pub enable_choices: bool,

    /// Lore and facts, always included in context.
    #[serde(default)]
    pub memory: Option<String>,
    /// Style guidance placed closest to the generation point.
    #[serde(default)]
    pub authors_note: Option<String>,
    /// Custom generation rules for this world.
    #[serde(default)]
    pub world_instructions: Option<String>,
}

fn default_style() -> String {
    DEFAULT_STYLE.to_string()
}

fn default_preset() -> String {
    DEFAULT_PRESET.to_string()
}

fn default_text_provider() -> String {
    "openai".to_string()
}

fn default_image_provider() -> String {
    "pollinations".to_string()
}

impl WorldConfig {
    pub fn new(title: impl Into<String>, theme: impl Into<String>, slug: WorldSlug) -> Self {
        Self {
            title: title.into(),
            slug,
            theme: theme.into(),
            style_pack: default_style(),
            preset: default_preset(),
            maturity_level: MaturityLevel::default(),
            chapter_length: ChapterLength::default(),
            text_provider: default_text_provider(),
            text_model: None,
            image_provider: default_image_provider(),
            image_model: None,
            aspect_ratio: AspectRatio::default(),
            enable_choices: false,
            memory: None,
            authors_note: None,
            world_instructions: None,
        }
    }

    pub fn with_style(mut self, style_pack: impl Into<String>) -> Self {
        self.style_pack = style_pack.into();
        self
    }

    pub fn with_preset(mut self, preset: impl Into<String>) -> Self {
        self.preset = preset.into();
        self
    }

    pub fn with_maturity(mut self, level: MaturityLevel) -> Self {
        self.maturity_level = level;
        self
    }

    pub fn with_chapter_length(mut self, length: ChapterLength) -> Self {
        self.chapter_length = length;
        self
    }

    pub fn with_text_provider(mut self, provider: impl Into<String>, model: Option<String>) -> Self {
        self.text_provider = provider.into();
        self.text_model = model;
        self
    }

    pub fn with_image_provider(mut self, provider: impl Into<String>, model: Option<String>) -> Self {
        self.image_provider = provider.into();
        self.image_model = model;
        self
    }

    pub fn with_choices(mut self, enabled: bool) -> Self {
        self.enable_choices = enabled;
        self
    }

    pub fn with_memory(mut self, memory: impl Into<String>) -> Self {
        self.memory = Some(memory.into());
        self
    }

    pub fn with_authors_note(mut self, note: impl Into<String>) -> Self {
        self.authors_note = Some(note.into());
        self
    }

    pub fn with_world_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.world_instructions = Some(instructions.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_json() {
        let config: WorldConfig = serde_json::from_str(
            r#"{"title": "Tidewater", "slug": "tidewater", "theme": "a drowned city"}"#,
        )
        .unwrap();
        assert_eq!(config.style_pack, "storybook-ink");
        assert_eq!(config.preset, "cozy-adventure");
        assert_eq!(config.image_provider, "pollinations");
        assert!(!config.enable_choices);
        assert!(config.memory.is_none());
    }

    #[test]
    fn test_builder() {
        let slug = WorldSlug::parse("dockside").unwrap();
        let config = WorldConfig::new("Dockside", "rain and rope", slug)
            .with_preset("noir-mystery")
            .with_memory("The harbor master lies.")
            .with_choices(true);
        assert_eq!(config.preset, "noir-mystery");
        assert_eq!(config.memory.as_deref(), Some("The harbor master lies."));
        assert!(config.enable_choices);
    }
}
