//! Engine-wide settings.

use crate::memory::{DEFAULT_HISTORY_WINDOW, DEFAULT_OLDER_WINDOW};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Settings shared by every world an engine serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Directory holding one subdirectory per world.
    pub worlds_dir: PathBuf,
    /// Chapters summarized in full in each prompt.
    pub history_window: usize,
    /// Chapters before that, listed by title only.
    pub older_title_window: usize,
    pub text_timeout: Duration,
    pub image_timeout: Duration,
    /// Buffered progress events per job before slow observers lag.
    pub progress_capacity: usize,
    /// How long finished jobs stay subscribable.
    pub job_retention: Duration,
    pub max_image_bytes: usize,
    /// Also take an advisory file lock so separate processes exclude each other.
    pub file_locks: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worlds_dir: PathBuf::from("worlds"),
            history_window: DEFAULT_HISTORY_WINDOW,
            older_title_window: DEFAULT_OLDER_WINDOW,
            text_timeout: Duration::from_secs(120),
            image_timeout: Duration::from_secs(90),
            progress_capacity: 64,
            job_retention: Duration::from_secs(600),
            max_image_bytes: 50 * 1024 * 1024,
            file_locks: true,
        }
    }
}

impl EngineConfig {
    pub fn new(worlds_dir: impl Into<PathBuf>) -> Self {
        Self {
            worlds_dir: worlds_dir.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden by `STORYWORLD_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            worlds_dir: std::env::var("STORYWORLD_WORLDS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.worlds_dir),
            history_window: env_or("STORYWORLD_HISTORY_WINDOW", defaults.history_window),
            older_title_window: env_or(
                "STORYWORLD_OLDER_TITLE_WINDOW",
                defaults.older_title_window,
            ),
            text_timeout: env_secs("STORYWORLD_TEXT_TIMEOUT_SECS", defaults.text_timeout),
            image_timeout: env_secs("STORYWORLD_IMAGE_TIMEOUT_SECS", defaults.image_timeout),
            progress_capacity: env_or("STORYWORLD_PROGRESS_CAPACITY", defaults.progress_capacity),
            job_retention: env_secs("STORYWORLD_JOB_RETENTION_SECS", defaults.job_retention),
            max_image_bytes: env_or("STORYWORLD_MAX_IMAGE_BYTES", defaults.max_image_bytes),
            file_locks: env_or("STORYWORLD_FILE_LOCKS", defaults.file_locks),
        }
    }

    pub fn with_worlds_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.worlds_dir = dir.into();
        self
    }

    pub fn with_history_window(mut self, chapters: usize) -> Self {
        self.history_window = chapters;
        self
    }

    pub fn with_older_title_window(mut self, chapters: usize) -> Self {
        self.older_title_window = chapters;
        self
    }

    pub fn with_text_timeout(mut self, timeout: Duration) -> Self {
        self.text_timeout = timeout;
        self
    }

    pub fn with_image_timeout(mut self, timeout: Duration) -> Self {
        self.image_timeout = timeout;
        self
    }

    pub fn with_progress_capacity(mut self, capacity: usize) -> Self {
        self.progress_capacity = capacity;
        self
    }

    pub fn with_job_retention(mut self, retention: Duration) -> Self {
        self.job_retention = retention;
        self
    }

    pub fn with_max_image_bytes(mut self, bytes: usize) -> Self {
        self.max_image_bytes = bytes;
        self
    }

    pub fn with_file_locks(mut self, enabled: bool) -> Self {
        self.file_locks = enabled;
        self
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "ignoring unparsable setting");
            default
        }),
        Err(_) => default,
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    Duration::from_secs(env_or(key, default.as_secs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.history_window, 4);
        assert_eq!(config.older_title_window, 4);
        assert_eq!(config.text_timeout, Duration::from_secs(120));
        assert_eq!(config.image_timeout, Duration::from_secs(90));
        assert_eq!(config.progress_capacity, 64);
        assert_eq!(config.job_retention, Duration::from_secs(600));
        assert_eq!(config.max_image_bytes, 52_428_800);
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new("/tmp/worlds")
            .with_history_window(2)
            .with_text_timeout(Duration::from_millis(50))
            .with_file_locks(false);
        assert_eq!(config.worlds_dir, PathBuf::from("/tmp/worlds"));
        assert_eq!(config.history_window, 2);
        assert_eq!(config.text_timeout, Duration::from_millis(50));
        assert!(!config.file_locks);
    }

    #[test]
    fn test_env_parsing_falls_back() {
        assert_eq!(env_or("STORYWORLD_TEST_UNSET_KEY", 7usize), 7);
        std::env::set_var("STORYWORLD_TEST_BAD_NUMBER", "lots");
        assert_eq!(env_or("STORYWORLD_TEST_BAD_NUMBER", 3usize), 3);
        std::env::set_var("STORYWORLD_TEST_SECS", " 45 ");
        assert_eq!(
            env_secs("STORYWORLD_TEST_SECS", Duration::from_secs(1)),
            Duration::from_secs(45)
        );
    }
}
