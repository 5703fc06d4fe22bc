//! Storyworld - the primary public API.
//!
//! Wraps storage, providers, locks and the job board behind one cloneable
//! handle. Every operation names its world explicitly; there is no implicit
//! "current world".

use crate::choices::{
    fallback_reasoning, infer_reasoning, pick_random_choice, ChoiceSelection, ReasoningSource,
    SelectedChoice,
};
use crate::config::EngineConfig;
use crate::error::GenerationError;
use crate::jobs::{JobBoard, JobHandle, JobId, JobKind, JobSnapshot, JobSubscription};
use crate::lock::{WorldLockGuard, WorldLocks};
use crate::persist::{WorldStore, WorldSummary};
use crate::pipeline::{GeneratedChapter, GenerationRequest, Pipeline, Target};
use crate::presets;
use crate::slug::WorldSlug;
use crate::styles;
use crate::world::{DeletionRecord, SceneImage, WorldConfig, WorldError, WorldState};
use providers::ProviderRegistry;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

struct EngineInner {
    config: EngineConfig,
    store: WorldStore,
    registry: ProviderRegistry,
    locks: WorldLocks,
    jobs: JobBoard,
}

/// Handle to a chapter generation engine. Cheap to clone.
#[derive(Clone)]
pub struct Storyworld {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for Storyworld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storyworld")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .finish()
    }
}

impl Storyworld {
    pub fn new(config: EngineConfig, registry: ProviderRegistry) -> Self {
        let store = WorldStore::new(config.worlds_dir.clone());
        let jobs = JobBoard::new(config.progress_capacity, config.job_retention);
        Self {
            inner: Arc::new(EngineInner {
                config,
                store,
                registry,
                locks: WorldLocks::new(),
                jobs,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &WorldStore {
        &self.inner.store
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.inner.registry
    }

    fn pipeline(&self) -> Pipeline<'_> {
        Pipeline {
            store: &self.inner.store,
            registry: &self.inner.registry,
            config: &self.inner.config,
        }
    }

    /// Take the world's generation lock without waiting.
    fn lock_world(&self, slug: &WorldSlug) -> Result<WorldLockGuard, GenerationError> {
        let lock_file = self.inner.store.lock_path(slug);
        let lock_file = self.inner.config.file_locks.then_some(lock_file.as_path());
        Ok(self.inner.locks.try_acquire(slug, lock_file)?)
    }

    async fn ensure_exists(&self, slug: &WorldSlug) -> Result<(), GenerationError> {
        if self.inner.store.exists(slug).await {
            Ok(())
        } else {
            Err(GenerationError::WorldNotFound(slug.clone()))
        }
    }

    // ========================================================================
    // World lifecycle
    // ========================================================================

    /// Store a new world. Its preset and style pack must exist.
    pub async fn create_world(&self, config: WorldConfig) -> Result<WorldConfig, GenerationError> {
        check_config(&config)?;
        self.inner.store.create_world(&config).await?;
        info!(world = %config.slug, title = %config.title, "created world");
        Ok(config)
    }

    /// Replace a world's configuration wholesale. The slug cannot change.
    pub async fn update_config(
        &self,
        slug: &WorldSlug,
        config: WorldConfig,
    ) -> Result<WorldConfig, GenerationError> {
        self.ensure_exists(slug).await?;
        let config = WorldConfig {
            slug: slug.clone(),
            ..config
        };
        check_config(&config)?;

        let _guard = self.lock_world(slug)?;
        self.inner.store.save_config(&config).await?;
        info!(world = %slug, "updated world config");
        Ok(config)
    }

    pub async fn list_worlds(&self) -> Result<Vec<WorldSummary>, GenerationError> {
        Ok(self.inner.store.list_worlds().await?)
    }

    pub async fn load_world(
        &self,
        slug: &WorldSlug,
    ) -> Result<(WorldConfig, WorldState), GenerationError> {
        Ok(self.inner.store.load_world(slug).await?)
    }

    /// The stored markdown document of one chapter.
    pub async fn chapter_markdown(&self, slug: &WorldSlug, number: u32) -> Result<String, GenerationError> {
        let state = self.inner.store.load_state(slug).await?;
        let chapter = state
            .chapter(number)
            .ok_or(GenerationError::ChapterNotFound(number))?;
        Ok(self.inner.store.read_chapter(slug, &chapter.filename).await?)
    }

    // ========================================================================
    // Generation
    // ========================================================================

    /// Start writing the next chapter in the background.
    ///
    /// Fails fast with [`GenerationError::LockHeld`] while another job owns
    /// the world. Progress is available through [`Self::subscribe`].
    pub async fn start_generation(&self, request: GenerationRequest) -> Result<JobId, GenerationError> {
        self.start(request, Target::Append).await
    }

    /// Start rewriting chapter `number` in place.
    pub async fn start_reroll(
        &self,
        request: GenerationRequest,
        number: u32,
    ) -> Result<JobId, GenerationError> {
        self.ensure_exists(&request.world).await?;
        let state = self.inner.store.load_state(&request.world).await?;
        state
            .chapter(number)
            .ok_or(GenerationError::ChapterNotFound(number))?;
        self.start(request, Target::Reroll(number)).await
    }

    async fn start(&self, request: GenerationRequest, target: Target) -> Result<JobId, GenerationError> {
        self.ensure_exists(&request.world).await?;
        let guard = self.lock_world(&request.world)?;
        let job = self.inner.jobs.create(request.world.clone(), job_kind(target));
        let id = job.id();
        info!(world = %request.world, job = %id, ?target, "generation started");

        let worker = self.clone();
        let worker_job = job.clone();
        tokio::spawn(async move {
            // A panic inside the pipeline surfaces here as a JoinError.
            let result = tokio::spawn(async move {
                worker.pipeline().run(&request, target, &worker_job).await
            })
            .await;

            // Release before the terminal event so observers can start the
            // next chapter as soon as they see it.
            drop(guard);
            finish_job(&job, result.unwrap_or_else(|e| Err(GenerationError::TaskFailed(e.to_string()))));
        });
        Ok(id)
    }

    /// Run one generation on the caller's task and return its typed result.
    pub async fn generate_and_wait(
        &self,
        request: GenerationRequest,
    ) -> Result<GeneratedChapter, GenerationError> {
        self.run_inline(request, Target::Append).await
    }

    /// Reroll chapter `number` on the caller's task.
    pub async fn reroll_and_wait(
        &self,
        request: GenerationRequest,
        number: u32,
    ) -> Result<GeneratedChapter, GenerationError> {
        self.run_inline(request, Target::Reroll(number)).await
    }

    async fn run_inline(
        &self,
        request: GenerationRequest,
        target: Target,
    ) -> Result<GeneratedChapter, GenerationError> {
        self.ensure_exists(&request.world).await?;
        let guard = self.lock_world(&request.world)?;
        let job = self.inner.jobs.create(request.world.clone(), job_kind(target));
        let result = self.pipeline().run(&request, target, &job).await;
        drop(guard);

        match &result {
            Ok(chapter) => {
                job.complete(chapter.clone());
            }
            Err(e) => {
                job.fail(e.to_string());
            }
        }
        result
    }

    pub fn subscribe(&self, job: JobId) -> Option<JobSubscription> {
        self.inner.jobs.subscribe(job)
    }

    pub fn job(&self, job: JobId) -> Option<JobSnapshot> {
        self.inner.jobs.snapshot(job)
    }

    /// Whether a generation is in flight for the world in this process.
    pub fn is_generating(&self, slug: &WorldSlug) -> bool {
        self.inner.locks.is_held(slug)
    }

    // ========================================================================
    // Choices, images, administration
    // ========================================================================

    /// Commit the reader's choice on a chapter. One-way.
    pub async fn select_choice(
        &self,
        slug: &WorldSlug,
        number: u32,
        selection: ChoiceSelection,
        reasoning: ReasoningSource,
    ) -> Result<SelectedChoice, GenerationError> {
        self.ensure_exists(slug).await?;
        let _guard = self.lock_world(slug)?;
        let (config, mut state) = self.inner.store.load_world(slug).await?;

        let chapter = state
            .chapter(number)
            .ok_or(GenerationError::ChapterNotFound(number))?;
        if let Some(selected) = &chapter.selected_choice_id {
            return Err(WorldError::ChoiceAlreadySelected {
                chapter: number,
                selected: selected.clone(),
            }
            .into());
        }
        let id = match selection {
            ChoiceSelection::Id(id) => id,
            ChoiceSelection::Auto => {
                pick_random_choice(chapter).ok_or(WorldError::NoChoices(number))?
            }
        };
        let choice = chapter
            .choice(&id)
            .cloned()
            .ok_or_else(|| match chapter.meta.choices.is_empty() {
                true => WorldError::NoChoices(number),
                false => WorldError::UnknownChoice {
                    chapter: number,
                    choice: id.clone(),
                },
            })?;

        let reasoning = match reasoning {
            ReasoningSource::Provided(text) => Some(text),
            ReasoningSource::None => None,
            ReasoningSource::Infer => Some(match self.pipeline().text_provider(&config) {
                Ok(provider) => {
                    infer_reasoning(
                        provider.as_ref(),
                        &config,
                        chapter,
                        &choice,
                        self.inner.config.text_timeout,
                    )
                    .await
                }
                Err(e) => {
                    warn!(world = %slug, error = %e, "no provider for reasoning inference");
                    fallback_reasoning(&choice)
                }
            }),
        };

        state.select_choice(number, &choice.id, reasoning.clone())?;
        self.inner.store.save_state(slug, &state).await?;
        info!(world = %slug, chapter = number, choice = %choice.id, "choice selected");

        Ok(SelectedChoice {
            chapter: number,
            choice,
            reasoning,
        })
    }

    /// Render a chapter's scene again, bypassing the cache.
    ///
    /// Always produces a new file; the chapter and the cache entry for its
    /// prompt are pointed at it.
    pub async fn regenerate_image(&self, slug: &WorldSlug, number: u32) -> Result<SceneImage, GenerationError> {
        self.ensure_exists(slug).await?;
        let _guard = self.lock_world(slug)?;
        let (config, mut state) = self.inner.store.load_world(slug).await?;

        let scene_prompt = state
            .chapter(number)
            .ok_or(GenerationError::ChapterNotFound(number))?
            .meta
            .scene_prompt
            .clone();
        if scene_prompt.is_empty() {
            return Err(GenerationError::NoScenePrompt(number));
        }
        let style = styles::style_pack(&config.style_pack)
            .ok_or_else(|| GenerationError::UnknownStyle(config.style_pack.clone()))?;
        let pipeline = self.pipeline();
        let provider = pipeline.image_provider(&config)?;
        let mut cache = self.inner.store.load_image_cache(slug).await?;

        let rendered = pipeline
            .render_scene(slug, provider.as_ref(), &config, style, number, &scene_prompt, &cache, true)
            .await?;

        if let Some((key, entry)) = rendered.cache_update {
            cache.insert(key, entry);
            self.inner.store.save_image_cache(slug, &cache).await?;
        }
        if let Some(chapter) = state.chapters.get_mut(number as usize - 1) {
            chapter.image = Some(rendered.image.clone());
        }
        self.inner.store.save_state(slug, &state).await?;
        info!(world = %slug, chapter = number, path = %rendered.image.path, "regenerated scene image");
        Ok(rendered.image)
    }

    /// Administrative override: remove the final chapter with an audit entry.
    pub async fn delete_latest_chapter(
        &self,
        slug: &WorldSlug,
        reason: impl Into<String>,
    ) -> Result<DeletionRecord, GenerationError> {
        self.ensure_exists(slug).await?;
        let _guard = self.lock_world(slug)?;
        let mut state = self.inner.store.load_state(slug).await?;

        let (chapter, record) = state.delete_latest_chapter(reason)?;
        let mut cache = self.inner.store.load_image_cache(slug).await?;
        // Cache hits share files across chapters; keep anything a surviving
        // chapter still points at.
        let in_use: HashSet<&str> = state
            .chapters
            .iter()
            .filter_map(|c| c.image.as_ref().map(|i| i.path.as_str()))
            .collect();
        let mut images: Vec<String> = cache
            .entries()
            .filter(|(_, e)| e.chapter == chapter.number)
            .map(|(_, e)| e.path.clone())
            .chain(chapter.image.iter().map(|i| i.path.clone()))
            .filter(|p| !in_use.contains(p.as_str()))
            .collect();
        images.sort();
        images.dedup();

        // Commit first; stray files are harmless, a dangling chapter is not.
        self.inner.store.save_state(slug, &state).await?;
        self.inner
            .store
            .remove_file(slug, &format!("chapters/{}", chapter.filename))
            .await?;
        for path in &images {
            self.inner.store.remove_file(slug, path).await?;
        }
        if cache.forget_paths(&images) > 0 {
            self.inner.store.save_image_cache(slug, &cache).await?;
        }

        warn!(
            world = %slug,
            chapter = record.chapter,
            title = %record.title,
            reason = %record.reason,
            removed_entities = record.removed_entities.len(),
            "deleted latest chapter"
        );
        Ok(record)
    }
}

fn job_kind(target: Target) -> JobKind {
    match target {
        Target::Append => JobKind::Generate,
        Target::Reroll(n) => JobKind::Reroll(n),
    }
}

fn check_config(config: &WorldConfig) -> Result<(), GenerationError> {
    if presets::preset(&config.preset).is_none() {
        return Err(GenerationError::UnknownPreset(config.preset.clone()));
    }
    if styles::style_pack(&config.style_pack).is_none() {
        return Err(GenerationError::UnknownStyle(config.style_pack.clone()));
    }
    Ok(())
}

fn finish_job(job: &JobHandle, result: Result<GeneratedChapter, GenerationError>) {
    match result {
        Ok(chapter) => {
            for warning in &chapter.warnings {
                warn!(job = %job.id(), "{warning}");
            }
            job.complete(chapter);
        }
        Err(e) => {
            warn!(job = %job.id(), error = %e, "generation failed");
            job.fail(e.to_string());
        }
    }
}
