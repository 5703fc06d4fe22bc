//! Narrative presets, maturity levels and chapter lengths.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key used when a world does not name a preset.
pub const DEFAULT_PRESET: &str = "cozy-adventure";

/// A named bundle of tone and pacing directives.
#[derive(Debug, Clone, PartialEq)]
pub struct Preset {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub temperature: f32,
    /// Standing voice and tone rules.
    pub system_directives: &'static str,
    /// Concrete beats to include in each chapter.
    pub text_instructions: &'static str,
}

lazy_static::lazy_static! {
    /// Built-in presets, keyed by preset key.
    pub static ref PRESETS: BTreeMap<&'static str, Preset> = [
        Preset {
            key: "cozy-adventure",
            name: "Cozy Adventure",
            description: "Wholesome explorations, wonder, gentle stakes, warm tone.",
            temperature: 0.9,
            system_directives: "Write with warmth and curiosity. Keep stakes human-scale; avoid graphic violence. \
                Balance narration with dialogue; favor sensory detail (smell, texture, sound).",
            text_instructions: "Lean into small acts of courage, cozy spaces, and companionship. \
                Include at least one tactile object or motif that carries through the chapter.",
        },
        Preset {
            key: "noir-mystery",
            name: "Noir Mystery",
            description: "Moody, wry, metaphor-rich, moral gray zones.",
            temperature: 0.85,
            system_directives: "Adopt a noir sensibility: sparse but evocative prose, sharp dialogue, and layered clues. \
                Cynicism tempered by wit; keep answers just out of reach.",
            text_instructions: "Feature a reversible clue and a reveal that raises more questions. \
                Use precise, image-rich metaphors; keep momentum taut.",
        },
        Preset {
            key: "epic-fantasy",
            name: "Epic Fantasy",
            description: "Grand vistas, mythic stakes, lyrical cadence.",
            temperature: 1.0,
            system_directives: "Use lyrical, myth-tinged prose with sweeping scale and resonant imagery. \
                Build momentum toward a resonant closing beat; keep character voices distinct.",
            text_instructions: "Include a moment of awe, a whispered history, and a choice with cost.",
        },
        Preset {
            key: "solarpunk-explorer",
            name: "Solarpunk Explorer",
            description: "Inventive systems, hopepunk tone, practical wonder.",
            temperature: 0.88,
            system_directives: "Optimistic, systems-aware storytelling with practical ingenuity and cooperative problem-solving. \
                Emphasize ecology, craft, and accessible tech.",
            text_instructions: "Show a small technology or practice that helps the community; describe how it works.",
        },
        Preset {
            key: "gothic-horror",
            name: "Gothic Horror",
            description: "Atmospheric dread, psychological tension, haunting beauty.",
            temperature: 0.92,
            system_directives: "Build oppressive atmosphere through architecture, weather, and shadow. \
                Favor psychological unease over shock; let dread accumulate. Keep prose ornate but precise.",
            text_instructions: "Include a threshold crossed, an inherited curse or secret, and something beautiful made sinister. \
                End on lingering unease rather than resolution.",
        },
        Preset {
            key: "space-opera",
            name: "Space Opera",
            description: "Galactic scale, diverse cultures, political intrigue among the stars.",
            temperature: 0.95,
            system_directives: "Balance vast scale with personal stakes. Feature diverse alien perspectives and cultures. \
                Mix action with diplomacy; keep tech consistent within the scene.",
            text_instructions: "Show at least two different cultures or species interacting. \
                Include one small detail that reveals larger political tensions.",
        },
        Preset {
            key: "slice-of-life",
            name: "Slice of Life",
            description: "Quiet moments, everyday magic, character-focused intimacy.",
            temperature: 0.87,
            system_directives: "Find meaning in the mundane. Focus on internal states, small gestures, and subtle shifts. \
                Let silence and pauses breathe. Avoid melodrama; keep stakes personal and grounded.",
            text_instructions: "Center a routine activity that reveals character. Include sensory details of home or comfort. \
                Let emotion emerge through observation rather than declaration.",
        },
        Preset {
            key: "cosmic-horror",
            name: "Cosmic Horror",
            description: "Existential dread, incomprehensible forces, sanity fraying.",
            temperature: 0.93,
            system_directives: "Emphasize the unknowable and the insignificance of human concerns. \
                Use geometric or abstract imagery; avoid explaining the horror. Build disorientation.",
            text_instructions: "Feature something that defies natural law or comprehension. \
                Show a character's worldview cracking. Use precise, clinical language for the impossible.",
        },
        Preset {
            key: "cyberpunk-noir",
            name: "Cyberpunk Noir",
            description: "High-tech low-life, neon-soaked streets, corporate shadows.",
            temperature: 0.86,
            system_directives: "Blend noir sensibility with tech-saturated future. Sharp contrasts: neon and shadow, wealth and poverty. \
                Feature tech as both tool and threat. Keep dialogue punchy and world-weary.",
            text_instructions: "Show technology integrated into daily life. Include corporate influence or surveillance. \
                Feature at least one 'jacked-in' or augmented moment.",
        },
        Preset {
            key: "whimsical-fairy-tale",
            name: "Whimsical Fairy Tale",
            description: "Playful enchantment, talking creatures, moral lessons with heart.",
            temperature: 0.96,
            system_directives: "Write with childlike wonder and clever wordplay. Feature anthropomorphized elements. \
                Balance whimsy with gentle wisdom. Use classic fairy tale rhythms and repetition.",
            text_instructions: "Include a magical rule or transformation. Feature a riddle, song, or rhyme. \
                Let a small creature or object offer unexpected help.",
        },
        Preset {
            key: "post-apocalyptic",
            name: "Post-Apocalyptic",
            description: "Survival amid ruins, harsh beauty, rebuilding hope.",
            temperature: 0.89,
            system_directives: "Balance bleakness with resilience. Show scarcity and adaptation. \
                Find beauty in decay and determination. Keep resource concerns tactile and present.",
            text_instructions: "Feature salvaged or repurposed technology. Show evidence of the old world. \
                Include a moment of found beauty or preserved culture.",
        },
        Preset {
            key: "historical-intrigue",
            name: "Historical Intrigue",
            description: "Period authenticity, courtly machinations, personal stakes in grand events.",
            temperature: 0.84,
            system_directives: "Ground narrative in historical texture: manners, technology, power structures. \
                Feature layered social dynamics and coded communication. Balance period voice with accessibility.",
            text_instructions: "Include period-accurate details of dress, food, or custom. \
                Show power dynamics through gesture or protocol. Feature written correspondence or formal address.",
        },
    ]
    .into_iter()
    .map(|preset| (preset.key, preset))
    .collect();
}

/// Look up a preset by key.
pub fn preset(key: &str) -> Option<&'static Preset> {
    PRESETS.get(key)
}

/// Content ceiling for a world.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaturityLevel {
    #[default]
    General,
    Teen,
    Mature,
    Explicit,
}

impl MaturityLevel {
    /// Instruction line that caps whatever the preset asks for.
    pub fn guidance(&self) -> &'static str {
        match self {
            MaturityLevel::General => {
                "Write family-friendly content suitable for all ages. Keep themes light and appropriate."
            }
            MaturityLevel::Teen => {
                "Write young adult fiction. Include tension, conflict, and emotional depth appropriate for teen readers."
            }
            MaturityLevel::Mature => {
                "Write adult fiction with mature themes and realistic situations. Use authentic language and explore complex emotional landscapes."
            }
            MaturityLevel::Explicit => {
                "Write unrestricted adult fiction with full creative freedom. Portray mature themes authentically and unflinchingly as serves the story."
            }
        }
    }
}

/// Target prose length of a chapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChapterLength {
    Short,
    #[default]
    Medium,
    Long,
}

impl ChapterLength {
    /// Inclusive word range requested from the model.
    pub fn word_range(&self) -> (u32, u32) {
        match self {
            ChapterLength::Short => (400, 600),
            ChapterLength::Medium => (800, 1200),
            ChapterLength::Long => (1600, 2400),
        }
    }

    /// Output token ceiling with headroom for the metadata block.
    pub fn max_tokens(&self) -> usize {
        let (_, max_words) = self.word_range();
        (max_words as usize * 2).max(2048)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_presets_present() {
        assert_eq!(PRESETS.len(), 12);
        for (key, preset) in PRESETS.iter() {
            assert_eq!(*key, preset.key);
            assert!(preset.temperature > 0.0 && preset.temperature <= 1.0);
            assert!(!preset.system_directives.is_empty());
        }
    }

    #[test]
    fn test_preset_lookup() {
        assert_eq!(preset("noir-mystery").unwrap().name, "Noir Mystery");
        assert!(preset(DEFAULT_PRESET).is_some());
        assert!(preset("mumblecore").is_none());
    }

    #[test]
    fn test_maturity_serde() {
        let level: MaturityLevel = serde_json::from_str("\"teen\"").unwrap();
        assert_eq!(level, MaturityLevel::Teen);
        assert!(level.guidance().contains("young adult"));
    }

    #[test]
    fn test_chapter_length_ranges() {
        assert_eq!(ChapterLength::Short.word_range(), (400, 600));
        assert_eq!(ChapterLength::default().word_range(), (800, 1200));
        assert_eq!(ChapterLength::Long.max_tokens(), 4800);
        assert_eq!(ChapterLength::Short.max_tokens(), 2048);
    }
}
