//! Testing utilities for the storyworld engine.
//!
//! This module provides tools for integration testing:
//! - `ScriptedTextProvider` / `ScriptedImageProvider` for deterministic runs
//!   without API calls
//! - `ScriptedChapter` for building generator output with a metadata block
//! - `TestHarness` wiring both into an engine over a scratch directory

use crate::config::EngineConfig;
use crate::engine::Storyworld;
use crate::error::GenerationError;
use crate::slug::{slugify, WorldSlug};
use crate::world::{WorldConfig, WorldState};
use async_trait::async_trait;
use providers::{
    GeneratedImage, GenerationParams, ImageProvider, ImageStyle, Prompt, ProviderError,
    ProviderRegistry, TextGeneration, TextProvider, Usage,
};
use serde_json::json;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Registry name of both scripted providers.
pub const SCRIPTED: &str = "scripted";

/// A text provider that replays queued responses in order.
pub struct ScriptedTextProvider {
    responses: Mutex<VecDeque<Result<String, ProviderError>>>,
    prompts: Mutex<Vec<Prompt>>,
    gate: Option<Arc<Semaphore>>,
    delay: Option<Duration>,
}

impl ScriptedTextProvider {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            gate: None,
            delay: None,
        }
    }

    /// Hold every call until a permit is added to `gate`. Each call
    /// consumes one permit.
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Sleep before answering (for timeout tests).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a raw reply.
    pub fn push_reply(&self, markdown: impl Into<String>) {
        self.queue().push_back(Ok(markdown.into()));
    }

    /// Queue a failure.
    pub fn push_error(&self, error: ProviderError) {
        self.queue().push_back(Err(error));
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, ProviderError>>> {
        self.responses.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every prompt received so far.
    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn remaining(&self) -> usize {
        self.queue().len()
    }
}

impl Default for ScriptedTextProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextProvider for ScriptedTextProvider {
    fn name(&self) -> &str {
        SCRIPTED
    }

    fn default_model(&self) -> &str {
        "scripted-text"
    }

    fn validate_model(&self, model: &str) -> bool {
        model.starts_with("scripted")
    }

    fn estimate_cost(&self, _model: &str, _token_count: usize) -> f64 {
        0.0
    }

    async fn generate(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<TextGeneration, ProviderError> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.clone());

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.queue().pop_front();
        let content = match next {
            Some(reply) => reply?,
            None => return Err(ProviderError::unavailable(SCRIPTED, "no scripted replies left")),
        };
        Ok(TextGeneration {
            usage: Usage {
                input_tokens: prompt.estimated_tokens(),
                output_tokens: content.len().div_ceil(4),
            },
            content,
            model: params
                .model
                .clone()
                .unwrap_or_else(|| self.default_model().to_string()),
        })
    }
}

/// An image provider returning distinct bytes on every call.
pub struct ScriptedImageProvider {
    calls: AtomicUsize,
    failing: AtomicBool,
    image_size: Option<usize>,
}

impl ScriptedImageProvider {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            image_size: None,
        }
    }

    /// Return images of exactly `bytes` bytes.
    pub fn with_image_size(mut self, bytes: usize) -> Self {
        self.image_size = Some(bytes);
        self
    }

    /// Make subsequent calls fail with `Unavailable`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedImageProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageProvider for ScriptedImageProvider {
    fn name(&self) -> &str {
        SCRIPTED
    }

    fn default_model(&self) -> &str {
        "scripted-image"
    }

    fn validate_model(&self, model: &str) -> bool {
        model.starts_with("scripted")
    }

    fn estimate_cost(&self, _model: &str) -> f64 {
        0.0
    }

    async fn generate(
        &self,
        prompt: &str,
        style: &ImageStyle,
    ) -> Result<GeneratedImage, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::unavailable(SCRIPTED, "image backend down"));
        }
        let bytes = match self.image_size {
            Some(size) => vec![0u8; size],
            None => format!("PNG#{call}:{prompt}").into_bytes(),
        };
        Ok(GeneratedImage {
            bytes,
            extension: "png".to_string(),
            model: style
                .model
                .clone()
                .unwrap_or_else(|| self.default_model().to_string()),
        })
    }
}

/// Builder for generator output: a metadata comment, a title and prose.
#[derive(Debug, Clone, Default)]
pub struct ScriptedChapter {
    title: String,
    scene_prompt: String,
    summary: String,
    in_scene: Vec<String>,
    characters: Vec<serde_json::Value>,
    locations: Vec<serde_json::Value>,
    items: Vec<serde_json::Value>,
    choices: Vec<serde_json::Value>,
    body: String,
}

impl ScriptedChapter {
    pub fn new(title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            scene_prompt: format!("A scene from {title}"),
            summary: format!("Summary of {title}."),
            body: format!("The story continues in {title}."),
            title,
            ..Self::default()
        }
    }

    pub fn with_scene_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.scene_prompt = prompt.into();
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Introduce a character and place it in the scene.
    pub fn with_character(mut self, id: &str, name: &str, description: &str) -> Self {
        self.characters
            .push(json!({"id": id, "name": name, "description": description}));
        self.in_scene.push(id.to_string());
        self
    }

    pub fn with_location(mut self, id: &str, name: &str, description: &str) -> Self {
        self.locations
            .push(json!({"id": id, "name": name, "description": description}));
        self.in_scene.push(id.to_string());
        self
    }

    pub fn with_item(mut self, id: &str, name: &str, description: &str) -> Self {
        self.items
            .push(json!({"id": id, "name": name, "description": description}));
        self.in_scene.push(id.to_string());
        self
    }

    /// Reference an entity without introducing it.
    pub fn featuring(mut self, id: &str) -> Self {
        self.in_scene.push(id.to_string());
        self
    }

    pub fn with_choice(mut self, id: &str, text: &str) -> Self {
        self.choices.push(json!({"id": id, "text": text}));
        self
    }

    pub fn to_markdown(&self) -> String {
        let meta = json!({
            "scene_prompt": self.scene_prompt,
            "characters_in_scene": self.in_scene,
            "summary": self.summary,
            "new_characters": self.characters,
            "new_locations": self.locations,
            "new_items": self.items,
            "choices": self.choices,
        });
        format!("<!-- {meta} -->\n\n# {}\n\n{}\n", self.title, self.body)
    }
}

/// An engine over a scratch directory with scripted providers registered.
pub struct TestHarness {
    pub engine: Storyworld,
    pub text: Arc<ScriptedTextProvider>,
    pub images: Arc<ScriptedImageProvider>,
    pub root: PathBuf,
}

impl TestHarness {
    /// Harness rooted at `root` (usually a temp dir).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_providers(root, ScriptedTextProvider::new(), ScriptedImageProvider::new())
    }

    pub fn with_providers(
        root: impl Into<PathBuf>,
        text: ScriptedTextProvider,
        images: ScriptedImageProvider,
    ) -> Self {
        let root = root.into();
        let config = EngineConfig::new(root.clone())
            .with_text_timeout(Duration::from_secs(5))
            .with_image_timeout(Duration::from_secs(5));
        Self::with_config(config, text, images)
    }

    pub fn with_config(
        config: EngineConfig,
        text: ScriptedTextProvider,
        images: ScriptedImageProvider,
    ) -> Self {
        let text = Arc::new(text);
        let images = Arc::new(images);
        let registry = ProviderRegistry::new()
            .with_text(text.clone())
            .with_image(images.clone());
        Self {
            root: config.worlds_dir.clone(),
            engine: Storyworld::new(config, registry),
            text,
            images,
        }
    }

    /// World config wired to the scripted providers.
    pub fn world_config(title: &str) -> Result<WorldConfig, GenerationError> {
        Ok(WorldConfig::new(title, format!("The world of {title}"), slugify(title)?)
            .with_text_provider(SCRIPTED, None)
            .with_image_provider(SCRIPTED, None))
    }

    /// Create a world with default settings and return its slug.
    pub async fn create_world(&self, title: &str) -> Result<WorldSlug, GenerationError> {
        self.create_world_with(Self::world_config(title)?).await
    }

    pub async fn create_world_with(&self, config: WorldConfig) -> Result<WorldSlug, GenerationError> {
        Ok(self.engine.create_world(config).await?.slug)
    }

    /// Queue the generator's next reply.
    pub fn expect_chapter(&self, chapter: ScriptedChapter) -> &Self {
        self.text.push_reply(chapter.to_markdown());
        self
    }

    pub async fn state(&self, slug: &WorldSlug) -> Result<WorldState, GenerationError> {
        Ok(self.engine.load_world(slug).await?.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract;

    #[test]
    fn test_scripted_chapter_parses() {
        let markdown = ScriptedChapter::new("The Lamp")
            .with_character("wren", "Wren", "A ferry pilot")
            .with_location("old-pier", "The Old Pier", "")
            .with_choice("a", "Light it")
            .to_markdown();
        let extraction = extract::extract(&markdown, 1);
        assert!(extraction.error.is_none());
        assert_eq!(extraction.title, "The Lamp");
        assert_eq!(extraction.meta.new_entities.len(), 2);
        assert_eq!(extraction.meta.entities_in_scene.len(), 2);
        assert_eq!(extraction.meta.choices.len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_text_provider_replays_in_order() {
        let provider = ScriptedTextProvider::new();
        provider.push_reply("one");
        provider.push_error(ProviderError::auth(SCRIPTED, "bad key"));

        let params = GenerationParams::default();
        let first = provider.generate(&Prompt::new("p1"), &params).await.unwrap();
        assert_eq!(first.content, "one");
        assert_eq!(first.model, "scripted-text");
        assert!(matches!(
            provider.generate(&Prompt::new("p2"), &params).await,
            Err(ProviderError::Auth { .. })
        ));
        assert!(matches!(
            provider.generate(&Prompt::new("p3"), &params).await,
            Err(ProviderError::Unavailable { .. })
        ));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_scripted_images_are_distinct() {
        let provider = ScriptedImageProvider::new();
        let style = ImageStyle::default();
        let a = provider.generate("pier", &style).await.unwrap();
        let b = provider.generate("pier", &style).await.unwrap();
        assert_ne!(a.bytes, b.bytes);
        provider.set_failing(true);
        assert!(provider.generate("pier", &style).await.is_err());
        assert_eq!(provider.calls(), 3);
    }
}
