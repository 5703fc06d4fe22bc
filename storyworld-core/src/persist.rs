//! On-disk world storage.
//!
//! Each world lives in its own directory under the worlds root:
//!
//! ```text
//! <slug>/config.json            WorldConfig
//! <slug>/world.json             WorldState (commit point of a generation)
//! <slug>/chapters/chapter-NNNN.md
//! <slug>/media/scenes/scene-NNNN-<key>.png
//! <slug>/media/index.json       image cache
//! <slug>/.generation.lock
//! ```
//!
//! JSON files carry a format `version` and every write goes through a
//! temporary file and a rename, so readers never see a partial file.

use crate::image_cache::ImageCache;
use crate::slug::WorldSlug;
use crate::world::{WorldConfig, WorldState};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("world not found: {0}")]
    WorldNotFound(WorldSlug),

    #[error("world already exists: {0}")]
    AlreadyExists(WorldSlug),
}

/// Current on-disk format version.
pub const STORE_VERSION: u32 = 1;

const CONFIG_FILE: &str = "config.json";
const STATE_FILE: &str = "world.json";
const CHAPTERS_DIR: &str = "chapters";
const SCENES_DIR: &str = "media/scenes";
const MEDIA_INDEX: &str = "media/index.json";
const LOCK_FILE: &str = ".generation.lock";

/// Listing entry for a stored world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldSummary {
    pub slug: WorldSlug,
    pub title: String,
    pub theme: String,
    pub chapters: usize,
}

/// Filesystem-backed store for every world under one root directory.
#[derive(Debug, Clone)]
pub struct WorldStore {
    root: PathBuf,
}

impl WorldStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn world_dir(&self, slug: &WorldSlug) -> PathBuf {
        self.root.join(slug.as_str())
    }

    pub fn lock_path(&self, slug: &WorldSlug) -> PathBuf {
        self.world_dir(slug).join(LOCK_FILE)
    }

    pub fn chapter_path(&self, slug: &WorldSlug, filename: &str) -> PathBuf {
        self.world_dir(slug).join(CHAPTERS_DIR).join(filename)
    }

    /// Relative path (inside the world directory) of a scene image.
    pub fn scene_relative_path(filename: &str) -> String {
        format!("{SCENES_DIR}/{filename}")
    }

    /// Resolve a world-relative path, refusing anything that escapes it.
    pub fn resolve(&self, slug: &WorldSlug, relative: &str) -> Result<PathBuf, PersistError> {
        let path = Path::new(relative);
        let safe = path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe || relative.is_empty() {
            return Err(PersistError::InvalidFormat(format!(
                "path escapes world directory: {relative}"
            )));
        }
        Ok(self.world_dir(slug).join(path))
    }

    pub async fn exists(&self, slug: &WorldSlug) -> bool {
        fs::try_exists(self.world_dir(slug).join(CONFIG_FILE))
            .await
            .unwrap_or(false)
    }

    // ========================================================================
    // World lifecycle
    // ========================================================================

    /// Lay out a new world directory with its config and an empty state.
    pub async fn create_world(&self, config: &WorldConfig) -> Result<(), PersistError> {
        let slug = &config.slug;
        if self.exists(slug).await {
            return Err(PersistError::AlreadyExists(slug.clone()));
        }
        let dir = self.world_dir(slug);
        fs::create_dir_all(dir.join(CHAPTERS_DIR)).await?;
        fs::create_dir_all(dir.join(SCENES_DIR)).await?;

        self.save_config(config).await?;
        self.save_state(slug, &WorldState::new()).await?;
        self.save_image_cache(slug, &ImageCache::new()).await?;
        debug!(world = %slug, dir = %dir.display(), "created world");
        Ok(())
    }

    pub async fn load_config(&self, slug: &WorldSlug) -> Result<WorldConfig, PersistError> {
        let path = self.world_dir(slug).join(CONFIG_FILE);
        read_versioned(&path)
            .await
            .map_err(|e| not_found_as(e, slug))
    }

    pub async fn save_config(&self, config: &WorldConfig) -> Result<(), PersistError> {
        let path = self.world_dir(&config.slug).join(CONFIG_FILE);
        write_versioned(&path, config).await
    }

    pub async fn load_state(&self, slug: &WorldSlug) -> Result<WorldState, PersistError> {
        let path = self.world_dir(slug).join(STATE_FILE);
        read_versioned(&path)
            .await
            .map_err(|e| not_found_as(e, slug))
    }

    pub async fn save_state(&self, slug: &WorldSlug, state: &WorldState) -> Result<(), PersistError> {
        let path = self.world_dir(slug).join(STATE_FILE);
        write_versioned(&path, state).await
    }

    pub async fn load_world(
        &self,
        slug: &WorldSlug,
    ) -> Result<(WorldConfig, WorldState), PersistError> {
        let config = self.load_config(slug).await?;
        let state = self.load_state(slug).await?;
        Ok((config, state))
    }

    /// Every readable world under the root, sorted by slug.
    pub async fn list_worlds(&self) -> Result<Vec<WorldSummary>, PersistError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut worlds = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Ok(slug) = WorldSlug::parse(&name.to_string_lossy()) else {
                continue;
            };
            match self.load_world(&slug).await {
                Ok((config, state)) => worlds.push(WorldSummary {
                    slug,
                    title: config.title,
                    theme: config.theme,
                    chapters: state.chapters.len(),
                }),
                Err(PersistError::WorldNotFound(_)) => {}
                Err(e) => warn!(world = %slug, error = %e, "skipping unreadable world"),
            }
        }
        worlds.sort_by(|a, b| a.slug.as_str().cmp(b.slug.as_str()));
        Ok(worlds)
    }

    // ========================================================================
    // Chapters and media
    // ========================================================================

    pub async fn write_chapter(
        &self,
        slug: &WorldSlug,
        filename: &str,
        markdown: &str,
    ) -> Result<(), PersistError> {
        let path = self.resolve(slug, &format!("{CHAPTERS_DIR}/{filename}"))?;
        atomic_write(&path, markdown.as_bytes()).await
    }

    pub async fn read_chapter(&self, slug: &WorldSlug, filename: &str) -> Result<String, PersistError> {
        let path = self.resolve(slug, &format!("{CHAPTERS_DIR}/{filename}"))?;
        Ok(fs::read_to_string(path).await?)
    }

    /// Write a file under the world directory and return its absolute path.
    pub async fn write_media(
        &self,
        slug: &WorldSlug,
        relative: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, PersistError> {
        let path = self.resolve(slug, relative)?;
        atomic_write(&path, bytes).await?;
        Ok(path)
    }

    pub async fn media_exists(&self, slug: &WorldSlug, relative: &str) -> bool {
        match self.resolve(slug, relative) {
            Ok(path) => fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Remove a world-relative file. Missing files are not an error.
    pub async fn remove_file(&self, slug: &WorldSlug, relative: &str) -> Result<(), PersistError> {
        let path = self.resolve(slug, relative)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn load_image_cache(&self, slug: &WorldSlug) -> Result<ImageCache, PersistError> {
        let path = self.world_dir(slug).join(MEDIA_INDEX);
        match read_versioned(&path).await {
            Err(PersistError::Io(e)) if e.kind() == ErrorKind::NotFound => Ok(ImageCache::new()),
            other => other,
        }
    }

    pub async fn save_image_cache(
        &self,
        slug: &WorldSlug,
        cache: &ImageCache,
    ) -> Result<(), PersistError> {
        let path = self.world_dir(slug).join(MEDIA_INDEX);
        write_versioned(&path, cache).await
    }
}

fn not_found_as(error: PersistError, slug: &WorldSlug) -> PersistError {
    match error {
        PersistError::Io(e) if e.kind() == ErrorKind::NotFound => {
            PersistError::WorldNotFound(slug.clone())
        }
        other => other,
    }
}

// ============================================================================
// File helpers
// ============================================================================

/// Write to a sibling temp file, flush it, then rename over the target.
pub async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    let dir = path
        .parent()
        .ok_or_else(|| PersistError::InvalidFormat(format!("no parent: {}", path.display())))?;
    fs::create_dir_all(dir).await?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()));

    let result = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

async fn write_versioned<T: Serialize>(path: &Path, body: &T) -> Result<(), PersistError> {
    let mut value = serde_json::to_value(body)?;
    let Value::Object(map) = &mut value else {
        return Err(PersistError::InvalidFormat(
            "expected a JSON object".to_string(),
        ));
    };
    map.insert("version".to_string(), Value::from(STORE_VERSION));
    let content = serde_json::to_string_pretty(&value)?;
    atomic_write(path, content.as_bytes()).await
}

async fn read_versioned<T: DeserializeOwned>(path: &Path) -> Result<T, PersistError> {
    let content = fs::read_to_string(path).await?;
    let value: Value = serde_json::from_str(&content)?;

    let found = value
        .get("version")
        .and_then(Value::as_u64)
        .ok_or_else(|| PersistError::InvalidFormat(format!("missing version in {}", path.display())))?;
    if found != STORE_VERSION as u64 {
        return Err(PersistError::VersionMismatch {
            expected: STORE_VERSION,
            found: found as u32,
        });
    }
    Ok(serde_json::from_value(value)?)
}
