//! Reader choice selection and reasoning inference.

use crate::world::{Chapter, Choice, WorldConfig};
use providers::{GenerationParams, Prompt, TextProvider};
use rand::seq::SliceRandom;
use std::time::Duration;
use tracing::{debug, warn};

/// Longest reasoning text kept on a chapter.
pub const MAX_REASONING_CHARS: usize = 200;

/// Which choice to commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChoiceSelection {
    Id(String),
    /// Pick one at random.
    Auto,
}

/// Where the reasoning attached to a selection comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReasoningSource {
    Provided(String),
    /// Ask the world's text provider, falling back to a stock sentence.
    Infer,
    None,
}

/// A committed selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedChoice {
    pub chapter: u32,
    pub choice: Choice,
    pub reasoning: Option<String>,
}

/// Random choice id from a chapter, if it offers any.
pub fn pick_random_choice(chapter: &Chapter) -> Option<String> {
    let mut rng = rand::thread_rng();
    chapter
        .meta
        .choices
        .choose(&mut rng)
        .map(|choice| choice.id.clone())
}

/// Reasoning used when inference is unavailable.
pub fn fallback_reasoning(choice: &Choice) -> String {
    format!("The reader chose to {}", choice.text.to_lowercase())
}

fn clamp_reasoning(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= MAX_REASONING_CHARS {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(MAX_REASONING_CHARS - 3).collect();
    clipped.push_str("...");
    clipped
}

/// Ask the text provider why a reader might have picked `choice`.
///
/// Never fails: provider errors and timeouts yield [`fallback_reasoning`].
pub async fn infer_reasoning(
    provider: &dyn TextProvider,
    config: &WorldConfig,
    chapter: &Chapter,
    choice: &Choice,
    timeout: Duration,
) -> String {
    let prompt = Prompt::new(format!(
        "Given this story context and reader's choice, infer in 1-2 sentences why the reader \
         might have chosen this option. Focus on narrative intent and character motivation.\n\n\
         Story Theme: {}\nChapter Context: {}\nReader's Choice: {}\n\nReasoning:",
        config.theme, chapter.meta.summary, choice.text
    ))
    .with_system("You are a narrative analyst. Provide concise, insightful reasoning about story choices.");

    let mut params = GenerationParams::default()
        .with_temperature(0.7)
        .with_max_tokens(200);
    if let Some(model) = &config.text_model {
        params = params.with_model(model.clone());
    }

    match tokio::time::timeout(timeout, provider.generate(&prompt, &params)).await {
        Ok(Ok(generation)) if !generation.content.trim().is_empty() => {
            debug!(chapter = chapter.number, "inferred choice reasoning");
            clamp_reasoning(&generation.content)
        }
        Ok(Ok(_)) => fallback_reasoning(choice),
        Ok(Err(e)) => {
            warn!(error = %e, "failed to infer choice reasoning");
            fallback_reasoning(choice)
        }
        Err(_) => {
            warn!(provider = provider.name(), "choice reasoning timed out");
            fallback_reasoning(choice)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::ChapterMeta;

    fn choice(id: &str, text: &str) -> Choice {
        Choice {
            id: id.into(),
            text: text.into(),
            description: String::new(),
        }
    }

    #[test]
    fn test_pick_random_choice() {
        let empty = Chapter::new(1, "One", ChapterMeta::default());
        assert!(pick_random_choice(&empty).is_none());

        let chapter = Chapter::new(
            1,
            "One",
            ChapterMeta {
                choices: vec![choice("a", "A"), choice("b", "B")],
                ..Default::default()
            },
        );
        for _ in 0..10 {
            let id = pick_random_choice(&chapter).unwrap();
            assert!(id == "a" || id == "b");
        }
    }

    #[test]
    fn test_fallback_reasoning() {
        assert_eq!(
            fallback_reasoning(&choice("a", "Follow The Lamp")),
            "The reader chose to follow the lamp"
        );
    }

    #[test]
    fn test_clamp_reasoning() {
        assert_eq!(clamp_reasoning("  short  "), "short");
        let long = "x".repeat(250);
        let clipped = clamp_reasoning(&long);
        assert_eq!(clipped.chars().count(), 200);
        assert!(clipped.ends_with("..."));
    }
}
