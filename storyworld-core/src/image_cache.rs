//! Scene image cache keyed by (prompt, style, model).
//!
//! Persisted per world as `media/index.json`. Lookups hit only when the
//! cached file still exists; explicit regeneration bypasses the lookup and
//! always produces a new file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Hex characters kept from the digest.
const KEY_LEN: usize = 16;

/// Stable cache key for a scene render.
///
/// The prompt is normalized (trimmed, whitespace collapsed, lowercased) so
/// cosmetic differences in generator output still hit.
pub fn cache_key(prompt: &str, style: &str, model: &str) -> String {
    let normalized = prompt
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.update([0u8]);
    hasher.update(style.as_bytes());
    hasher.update([0u8]);
    hasher.update(model.as_bytes());
    let digest = hasher.finalize();

    let mut hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex.truncate(KEY_LEN);
    hex
}

/// File name for a cached scene. Regenerations carry a unique suffix.
pub fn scene_filename(chapter: u32, key: &str, unique: Option<&str>, extension: &str) -> String {
    match unique {
        Some(suffix) => format!("scene-{chapter:04}-{key}-{suffix}.{extension}"),
        None => format!("scene-{chapter:04}-{key}.{extension}"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Path relative to the world directory.
    pub path: String,
    pub chapter: u32,
    pub prompt: String,
    pub style: String,
    pub model: String,
    pub provider: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCache {
    #[serde(default)]
    entries: BTreeMap<String, CacheEntry>,
}

impl ImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Insert or replace the entry for `key`, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, entry: CacheEntry) -> Option<CacheEntry> {
        self.entries.insert(key.into(), entry)
    }

    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    /// Drop every entry pointing at one of `paths`.
    pub fn forget_paths(&mut self, paths: &[String]) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !paths.contains(&e.path));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &CacheEntry)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str) -> CacheEntry {
        CacheEntry {
            path: path.into(),
            chapter: 1,
            prompt: "a pier".into(),
            style: "noir-sketch".into(),
            model: "flux".into(),
            provider: "pollinations".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_cache_key_normalizes_prompt() {
        let a = cache_key("A lamp  on the\npier ", "noir-sketch", "flux");
        let b = cache_key("a lamp on the pier", "noir-sketch", "flux");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_cache_key_separates_fields() {
        let base = cache_key("pier", "noir-sketch", "flux");
        assert_ne!(base, cache_key("pier", "pixel-rpg", "flux"));
        assert_ne!(base, cache_key("pier", "noir-sketch", "turbo"));
        // Field boundaries matter.
        assert_ne!(cache_key("ab", "c", "m"), cache_key("a", "bc", "m"));
    }

    #[test]
    fn test_scene_filename() {
        assert_eq!(
            scene_filename(3, "abcd", None, "png"),
            "scene-0003-abcd.png"
        );
        assert_eq!(
            scene_filename(3, "abcd", Some("1a2b3c4d"), "jpg"),
            "scene-0003-abcd-1a2b3c4d.jpg"
        );
    }

    #[test]
    fn test_insert_and_forget() {
        let mut cache = ImageCache::new();
        assert!(cache.insert("k1", entry("media/scenes/one.png")).is_none());
        cache.insert("k2", entry("media/scenes/two.png"));
        let old = cache.insert("k1", entry("media/scenes/three.png")).unwrap();
        assert_eq!(old.path, "media/scenes/one.png");

        let removed = cache.forget_paths(&["media/scenes/two.png".to_string()]);
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k1").unwrap().path, "media/scenes/three.png");
    }

    #[test]
    fn test_serde_shape() {
        let mut cache = ImageCache::new();
        cache.insert("k1", entry("media/scenes/one.png"));
        let json = serde_json::to_value(&cache).unwrap();
        assert_eq!(json["entries"]["k1"]["provider"], "pollinations");
        let back: ImageCache = serde_json::from_value(json).unwrap();
        assert_eq!(back, cache);
    }
}
