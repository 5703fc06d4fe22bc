//! Per-world generation locks.
//!
//! A world is locked in-process (a shared table of held slugs) and, when a
//! lock file is given, across processes with an advisory exclusive lock.
//! Acquisition never waits. The guard releases both on drop, which covers
//! success, error and panic paths alike.

use crate::slug::WorldSlug;
use fs2::FileExt;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("generation already running for world {0}")]
    Held(WorldSlug),

    #[error("lock file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Table of worlds with a generation in flight.
#[derive(Debug, Clone, Default)]
pub struct WorldLocks {
    held: Arc<Mutex<HashSet<WorldSlug>>>,
}

impl WorldLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashSet<WorldSlug>> {
        // Poisoning only means a holder panicked; the set itself is intact.
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_held(&self, slug: &WorldSlug) -> bool {
        self.table().contains(slug)
    }

    /// Take the lock for `slug` or fail immediately.
    pub fn try_acquire(
        &self,
        slug: &WorldSlug,
        lock_file: Option<&Path>,
    ) -> Result<WorldLockGuard, LockError> {
        if !self.table().insert(slug.clone()) {
            return Err(LockError::Held(slug.clone()));
        }

        let file = match lock_file.map(|path| lock_exclusive(path, slug)).transpose() {
            Ok(file) => file,
            Err(e) => {
                self.table().remove(slug);
                return Err(e);
            }
        };

        debug!(world = %slug, "acquired generation lock");
        Ok(WorldLockGuard {
            slug: slug.clone(),
            held: Arc::clone(&self.held),
            file,
        })
    }
}

fn lock_exclusive(path: &Path, slug: &WorldSlug) -> Result<File, LockError> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(file),
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
            Err(LockError::Held(slug.clone()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Exclusive hold on one world. Released on drop.
#[derive(Debug)]
pub struct WorldLockGuard {
    slug: WorldSlug,
    held: Arc<Mutex<HashSet<WorldSlug>>>,
    file: Option<File>,
}

impl WorldLockGuard {
    pub fn slug(&self) -> &WorldSlug {
        &self.slug
    }
}

impl Drop for WorldLockGuard {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = FileExt::unlock(&file) {
                warn!(world = %self.slug, error = %e, "failed to release lock file");
            }
        }
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.slug);
        debug!(world = %self.slug, "released generation lock");
    }
}
