//! World data model: configuration, entities, chapters and the state graph.

pub mod chapter;
pub mod config;
pub mod entity;
pub mod state;

pub use chapter::{Chapter, ChapterMeta, Choice, SceneImage, StoryHealth};
pub use config::WorldConfig;
pub use entity::{Entity, EntityId, EntityKind, NewEntity};
pub use state::{DeletionRecord, EntityDelta, WorldError, WorldState};
