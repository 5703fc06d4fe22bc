//! The chapter generation pipeline.
//!
//! One run moves through `init → text → extraction → image → saving` and
//! reports each transition to its job before starting the next stage. Any
//! fatal error returns before `saving`, so the world on disk is untouched.
//! Extraction and image failures degrade into warnings instead.
//!
//! The caller holds the world lock for the whole run.

use crate::choices::pick_random_choice;
use crate::config::EngineConfig;
use crate::error::{GenerationError, ImageGenerationError};
use crate::extract::{self, ValidatedRecord};
use crate::image_cache::{cache_key, scene_filename, CacheEntry, ImageCache};
use crate::jobs::{JobHandle, JobStage};
use crate::memory::ContextAssembler;
use crate::persist::WorldStore;
use crate::slug::WorldSlug;
use crate::styles::{self, StylePack};
use crate::world::{Chapter, SceneImage, WorldConfig, WorldState};
use chrono::Utc;
use providers::{
    GenerationParams, ImageProvider, ImageStyle, ProviderError, ProviderRegistry, RegistryError,
    TextProvider,
};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{info, warn};

/// A request to write the next chapter of a world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub world: WorldSlug,
    /// Steering text placed last in the prompt.
    pub focus: Option<String>,
    pub include_image: bool,
}

impl GenerationRequest {
    pub fn new(world: WorldSlug) -> Self {
        Self {
            world,
            focus: None,
            include_image: true,
        }
    }

    pub fn with_focus(mut self, focus: impl Into<String>) -> Self {
        self.focus = Some(focus.into());
        self
    }

    pub fn with_image(mut self, include_image: bool) -> Self {
        self.include_image = include_image;
        self
    }
}

/// The result of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedChapter {
    pub chapter: Chapter,
    /// The chapter document as written to disk.
    pub markdown: String,
    /// Recoverable problems (extraction, image) hit along the way.
    pub warnings: Vec<String>,
    pub rerolled: bool,
}

/// Which chapter a run writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Append,
    Reroll(u32),
}

/// A rendered (or cached) scene plus the cache entry to record for it.
pub(crate) struct RenderedScene {
    pub image: SceneImage,
    pub cache_update: Option<(String, CacheEntry)>,
}

pub(crate) struct Pipeline<'a> {
    pub store: &'a WorldStore,
    pub registry: &'a ProviderRegistry,
    pub config: &'a EngineConfig,
}

impl Pipeline<'_> {
    fn assembler(&self) -> ContextAssembler {
        ContextAssembler::new(self.config.history_window, self.config.older_title_window)
    }

    pub fn text_provider(&self, config: &WorldConfig) -> Result<Arc<dyn TextProvider>, GenerationError> {
        self.registry.text(&config.text_provider).ok_or_else(|| {
            RegistryError::UnknownProvider {
                kind: "text",
                name: config.text_provider.clone(),
            }
            .into()
        })
    }

    pub fn image_provider(
        &self,
        config: &WorldConfig,
    ) -> Result<Arc<dyn ImageProvider>, GenerationError> {
        self.registry.image(&config.image_provider).ok_or_else(|| {
            RegistryError::UnknownProvider {
                kind: "image",
                name: config.image_provider.clone(),
            }
            .into()
        })
    }

    pub async fn run(
        &self,
        request: &GenerationRequest,
        target: Target,
        job: &JobHandle,
    ) -> Result<GeneratedChapter, GenerationError> {
        let slug = &request.world;
        let mut warnings = Vec::new();

        // ---- init ----------------------------------------------------------
        job.advance(JobStage::Init, 5, "Loading world");
        let (config, mut state) = self.store.load_world(slug).await?;
        let text_provider = self.text_provider(&config)?;
        let image_provider = match request.include_image {
            true => Some(self.image_provider(&config)?),
            false => None,
        };
        let style = styles::style_pack(&config.style_pack)
            .ok_or_else(|| GenerationError::UnknownStyle(config.style_pack.clone()))?;

        let number = match target {
            Target::Append => {
                if config.enable_choices {
                    auto_select_previous(&mut state, job);
                }
                state.next_chapter_number()
            }
            Target::Reroll(n) => {
                state.chapter(n).ok_or(GenerationError::ChapterNotFound(n))?;
                n
            }
        };
        job.advance(JobStage::Init, 8, "World loaded, preparing context");

        let context = match target {
            Target::Append => self
                .assembler()
                .assemble(&config, &state, request.focus.as_deref())?,
            Target::Reroll(n) => {
                let snapshot = state.snapshot_before(n)?;
                self.assembler()
                    .assemble(&config, &snapshot, request.focus.as_deref())?
            }
        };

        // ---- text ----------------------------------------------------------
        job.advance(
            JobStage::Text,
            10,
            format!("Writing chapter {number} with {}", text_provider.name()),
        );
        let model = resolve_text_model(text_provider.as_ref(), &config, &mut warnings);
        let params = GenerationParams::default()
            .with_model(model.clone())
            .with_temperature(context.temperature)
            .with_max_tokens(context.max_tokens);
        let estimated = text_provider.estimate_cost(
            &model,
            context.prompt.estimated_tokens() + context.max_tokens,
        );
        info!(
            world = %slug,
            chapter = number,
            provider = text_provider.name(),
            model = %model,
            estimated_cost_usd = estimated,
            "requesting chapter text"
        );

        let generation = timeout(
            self.config.text_timeout,
            text_provider.generate(&context.prompt, &params),
        )
        .await
        .map_err(|_| ProviderError::timed_out(text_provider.name(), self.config.text_timeout))??;
        info!(
            world = %slug,
            chapter = number,
            model = %generation.model,
            input_tokens = generation.usage.input_tokens,
            output_tokens = generation.usage.output_tokens,
            cost_usd = text_provider.estimate_cost(&generation.model, generation.usage.total()),
            "chapter text received"
        );

        // ---- extraction ----------------------------------------------------
        job.advance(JobStage::Extraction, 50, "Extracting continuity");
        let extraction = extract::extract(&generation.content, number);
        if let Some(e) = &extraction.error {
            warn!(world = %slug, chapter = number, error = %e, "continuity extraction degraded");
            warnings.push(format!(
                "Continuity extraction failed ({e}); chapter saved without entities or choices"
            ));
        }
        extract::log_story_health(&extraction.meta, number);

        // Rerolls validate against the world with this chapter's own
        // entities released, so its replacement may reintroduce them.
        let mut working = match target {
            Target::Append => state,
            Target::Reroll(n) => {
                let mut working = state;
                let released = working.release_entities_of(n);
                if !released.is_empty() {
                    info!(chapter = n, released = released.len(), "released entities for reroll");
                }
                working
            }
        };
        let ValidatedRecord {
            mut meta, delta, ..
        } = extract::validate(extraction.meta, &working, number);
        if !config.enable_choices {
            meta.choices.clear();
        }

        // ---- image ---------------------------------------------------------
        let mut image = None;
        let mut cache = None;
        if let Some(provider) = &image_provider {
            job.advance(JobStage::Image, 60, "Rendering scene image");
            if meta.scene_prompt.is_empty() {
                warnings.push("No scene prompt was produced; image skipped".to_string());
            } else {
                let mut loaded = match self.store.load_image_cache(slug).await {
                    Ok(loaded) => loaded,
                    Err(e) => {
                        warn!(world = %slug, error = %e, "image cache unreadable, starting empty");
                        warnings.push(format!("Image cache could not be read ({e}); rebuilding it"));
                        ImageCache::new()
                    }
                };
                match self
                    .render_scene(slug, provider.as_ref(), &config, style, number, &meta.scene_prompt, &loaded, false)
                    .await
                {
                    Ok(rendered) => {
                        if let Some((key, entry)) = rendered.cache_update {
                            loaded.insert(key, entry);
                            cache = Some(loaded);
                        }
                        image = Some(rendered.image);
                    }
                    Err(e) => {
                        warn!(world = %slug, chapter = number, error = %e, "scene image failed");
                        warnings.push(format!(
                            "Scene image failed ({e}); chapter saved without an image"
                        ));
                    }
                }
            }
        }

        // ---- saving --------------------------------------------------------
        job.advance(JobStage::Saving, 95, format!("Saving chapter {number}"));
        let mut chapter = Chapter::new(number, extraction.title, meta);
        chapter.image = image;
        chapter.text_model = Some(generation.model);

        if let Target::Reroll(n) = target {
            // A committed selection is permanent; the next chapter was
            // written from it, so the rerolled chapter keeps that branch.
            if let Some(old) = working.chapter(n) {
                if old.selected_choice_id.is_some() {
                    chapter.meta.choices = old.meta.choices.clone();
                    chapter.selected_choice_id = old.selected_choice_id.clone();
                    chapter.choice_reasoning = old.choice_reasoning.clone();
                }
            }
        }

        let markdown = extract::render_markdown(&chapter.meta, &extraction.prose);
        self.store
            .write_chapter(slug, &chapter.filename, &markdown)
            .await?;
        if let Some(cache) = &cache {
            if let Err(e) = self.store.save_image_cache(slug, cache).await {
                warn!(world = %slug, error = %e, "image cache not saved");
                warnings.push(format!("Image cache could not be saved ({e})"));
            }
        }

        working.apply_delta(number, &delta);
        match target {
            Target::Append => working.append_chapter(chapter.clone())?,
            Target::Reroll(_) => {
                working.replace_chapter(chapter.clone())?;
            }
        }
        self.store.save_state(slug, &working).await?;

        info!(
            world = %slug,
            chapter = number,
            title = %chapter.title,
            introduced = delta.introduced.len(),
            refined = delta.refined.len(),
            warnings = warnings.len(),
            "chapter saved"
        );

        Ok(GeneratedChapter {
            chapter,
            markdown,
            warnings,
            rerolled: matches!(target, Target::Reroll(_)),
        })
    }

    /// Produce a scene image for a chapter, through the cache unless `fresh`.
    ///
    /// A fresh render always gets a new uniquely named file. The image file
    /// is written here; recording `cache_update` is up to the caller.
    #[allow(clippy::too_many_arguments)]
    pub async fn render_scene(
        &self,
        slug: &WorldSlug,
        provider: &dyn ImageProvider,
        config: &WorldConfig,
        style: &StylePack,
        chapter: u32,
        scene_prompt: &str,
        cache: &ImageCache,
        fresh: bool,
    ) -> Result<RenderedScene, ImageGenerationError> {
        let model = match &config.image_model {
            Some(model) if provider.validate_model(model) => model.clone(),
            Some(model) => {
                warn!(provider = provider.name(), model = %model, "unsupported image model, using default");
                provider.default_model().to_string()
            }
            None => provider.default_model().to_string(),
        };
        let key = cache_key(scene_prompt, style.key, &model);

        if !fresh {
            if let Some(entry) = cache.get(&key) {
                if self.store.media_exists(slug, &entry.path).await {
                    info!(world = %slug, chapter, key = %key, "scene image cache hit");
                    return Ok(RenderedScene {
                        image: SceneImage {
                            path: entry.path.clone(),
                            cache_key: key,
                            provider: entry.provider.clone(),
                            model: entry.model.clone(),
                        },
                        cache_update: None,
                    });
                }
            }
            info!(world = %slug, chapter, key = %key, "scene image cache miss");
        }

        let prompt = style.image_prompt(scene_prompt);
        let image_style = ImageStyle {
            model: Some(model.clone()),
            aspect_ratio: config.aspect_ratio,
        };
        info!(
            world = %slug,
            chapter,
            provider = provider.name(),
            model = %model,
            estimated_cost_usd = provider.estimate_cost(&model),
            "requesting scene image"
        );
        let rendered = timeout(self.config.image_timeout, provider.generate(&prompt, &image_style))
            .await
            .map_err(|_| ProviderError::timed_out(provider.name(), self.config.image_timeout))??;

        if rendered.bytes.len() > self.config.max_image_bytes {
            return Err(ImageGenerationError::TooLarge {
                size: rendered.bytes.len(),
                limit: self.config.max_image_bytes,
            });
        }

        let unique = fresh.then(|| uuid::Uuid::new_v4().simple().to_string()[..8].to_string());
        let filename = scene_filename(chapter, &key, unique.as_deref(), &rendered.extension);
        let path = WorldStore::scene_relative_path(&filename);
        self.store.write_media(slug, &path, &rendered.bytes).await?;

        let entry = CacheEntry {
            path: path.clone(),
            chapter,
            prompt: scene_prompt.to_string(),
            style: style.key.to_string(),
            model: rendered.model.clone(),
            provider: provider.name().to_string(),
            created_at: Utc::now(),
        };
        Ok(RenderedScene {
            image: SceneImage {
                path,
                cache_key: key.clone(),
                provider: provider.name().to_string(),
                model: rendered.model,
            },
            cache_update: Some((key, entry)),
        })
    }
}

/// Commit a random pick on the previous chapter when the reader left its
/// choices open. Persisted together with the new chapter.
fn auto_select_previous(state: &mut WorldState, job: &JobHandle) {
    let Some(previous) = state.latest_chapter() else {
        return;
    };
    if previous.selected_choice_id.is_some() {
        return;
    }
    let number = previous.number;
    let Some(id) = pick_random_choice(previous) else {
        return;
    };
    match state.select_choice(number, &id, None) {
        Ok(choice) => {
            let preview: String = choice.text.chars().take(50).collect();
            info!(chapter = number, choice = %choice.id, "auto-selected open choice");
            job.advance(
                JobStage::Init,
                9,
                format!("Auto-selecting choice: '{preview}'"),
            );
        }
        Err(e) => warn!(chapter = number, error = %e, "auto-selection failed"),
    }
}

fn resolve_text_model(
    provider: &dyn TextProvider,
    config: &WorldConfig,
    warnings: &mut Vec<String>,
) -> String {
    match &config.text_model {
        Some(model) if provider.validate_model(model) => model.clone(),
        Some(model) => {
            warn!(provider = provider.name(), model = %model, "unsupported text model, using default");
            warnings.push(format!(
                "Model {model} is not supported by {}; used {}",
                provider.name(),
                provider.default_model()
            ));
            provider.default_model().to_string()
        }
        None => provider.default_model().to_string(),
    }
}
