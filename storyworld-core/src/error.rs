//! Job-level error taxonomy.

use crate::lock::LockError;
use crate::memory::ContextError;
use crate::persist::PersistError;
use crate::slug::{SlugError, WorldSlug};
use crate::world::WorldError;
use providers::{ProviderError, RegistryError};
use thiserror::Error;

/// Errors that abort a generation job or a world operation.
///
/// Any of these stops the pipeline before the saving stage, so world state
/// is never partially updated.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation already running for world {0}")]
    LockHeld(WorldSlug),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("unknown preset: {0}")]
    UnknownPreset(String),

    #[error("unknown style pack: {0}")]
    UnknownStyle(String),

    #[error("unknown {kind} provider: {name}")]
    UnknownProvider { kind: &'static str, name: String },

    #[error("world not found: {0}")]
    WorldNotFound(WorldSlug),

    #[error("chapter {0} not found")]
    ChapterNotFound(u32),

    #[error("world already exists: {0}")]
    WorldExists(WorldSlug),

    #[error("chapter {0} has no scene prompt to illustrate")]
    NoScenePrompt(u32),

    #[error("world update rejected: {0}")]
    World(WorldError),

    #[error("storage error: {0}")]
    Persist(PersistError),

    #[error(transparent)]
    Slug(#[from] SlugError),

    #[error("lock file error: {0}")]
    LockIo(std::io::Error),

    #[error("image generation failed: {0}")]
    Image(ImageGenerationError),

    #[error("generation task failed: {0}")]
    TaskFailed(String),
}

impl From<WorldError> for GenerationError {
    fn from(e: WorldError) -> Self {
        match e {
            WorldError::ChapterNotFound(n) => GenerationError::ChapterNotFound(n),
            other => GenerationError::World(other),
        }
    }
}

impl From<PersistError> for GenerationError {
    fn from(e: PersistError) -> Self {
        match e {
            PersistError::WorldNotFound(slug) => GenerationError::WorldNotFound(slug),
            PersistError::AlreadyExists(slug) => GenerationError::WorldExists(slug),
            other => GenerationError::Persist(other),
        }
    }
}

impl From<ContextError> for GenerationError {
    fn from(e: ContextError) -> Self {
        match e {
            ContextError::UnknownPreset(key) => GenerationError::UnknownPreset(key),
            ContextError::UnknownStyle(key) => GenerationError::UnknownStyle(key),
        }
    }
}

impl From<LockError> for GenerationError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Held(slug) => GenerationError::LockHeld(slug),
            LockError::Io(e) => GenerationError::LockIo(e),
        }
    }
}

impl From<RegistryError> for GenerationError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::UnknownProvider { kind, name } => {
                GenerationError::UnknownProvider { kind, name }
            }
            missing @ RegistryError::MissingKey { .. } => {
                GenerationError::Provider(ProviderError::auth("registry", missing.to_string()))
            }
        }
    }
}

impl From<ImageGenerationError> for GenerationError {
    fn from(e: ImageGenerationError) -> Self {
        match e {
            ImageGenerationError::Provider(p) => GenerationError::Provider(p),
            other => GenerationError::Image(other),
        }
    }
}

impl GenerationError {
    /// Whether the failure came from an external provider.
    pub fn is_provider(&self) -> bool {
        matches!(self, GenerationError::Provider(_))
    }
}

/// A scene image could not be produced. Never fatal: the chapter is saved
/// without an image and this is reported as a warning.
#[derive(Debug, Error)]
pub enum ImageGenerationError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("image of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },

    #[error("could not store image: {0}")]
    Persist(#[from] PersistError),
}
