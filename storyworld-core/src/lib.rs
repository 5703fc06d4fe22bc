//! Chapter generation engine for persistent, illustrated story worlds.
//!
//! This crate provides:
//! - Layered context assembly from world memory, history and live entities
//! - A staged generation pipeline with observable progress
//! - Continuity extraction from the generator's metadata block
//! - Content-addressed scene image caching
//! - Per-world locking and crash-safe persistence
//!
//! # Quick Start
//!
//! ```ignore
//! use storyworld_core::{EngineConfig, GenerationRequest, Storyworld, WorldConfig};
//! use providers::{ProviderKeys, ProviderRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = ProviderRegistry::from_keys(&ProviderKeys::from_env());
//!     let engine = Storyworld::new(EngineConfig::from_env(), registry);
//!
//!     let slug = storyworld_core::slugify("Harbor Lights")?;
//!     engine
//!         .create_world(WorldConfig::new("Harbor Lights", "A fogbound port town", slug.clone()))
//!         .await?;
//!
//!     let chapter = engine.generate_and_wait(GenerationRequest::new(slug)).await?;
//!     println!("{}", chapter.markdown);
//!     Ok(())
//! }
//! ```

pub mod choices;
pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod image_cache;
pub mod jobs;
pub mod lock;
pub mod memory;
pub mod persist;
pub mod pipeline;
pub mod presets;
pub mod slug;
pub mod styles;
pub mod testing;
pub mod world;

// Primary public API
pub use choices::{ChoiceSelection, ReasoningSource, SelectedChoice};
pub use config::EngineConfig;
pub use engine::Storyworld;
pub use error::{GenerationError, ImageGenerationError};
pub use jobs::{JobEvent, JobId, JobOutcome, JobStage, JobSubscription, ProgressEvent};
pub use pipeline::{GeneratedChapter, GenerationRequest};
pub use slug::{slugify, SlugError, WorldSlug};
pub use testing::{ScriptedChapter, ScriptedImageProvider, ScriptedTextProvider, TestHarness};
pub use world::{
    Chapter, ChapterMeta, Choice, DeletionRecord, Entity, EntityId, EntityKind, WorldConfig,
    WorldState,
};
