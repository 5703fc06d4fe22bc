//! World identifiers.
//!
//! A slug names a world's directory under the worlds root, so it is
//! validated before it ever touches a path.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Longest accepted slug.
pub const MAX_SLUG_LEN: usize = 100;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SlugError {
    #[error("slug cannot be empty")]
    Empty,

    #[error("invalid slug {0:?}: contains path traversal characters")]
    Traversal(String),

    #[error("invalid slug {0:?}: cannot start or end with a dot or dash")]
    BadEdge(String),

    #[error("invalid slug {0:?}: only lowercase letters, digits and dashes are allowed")]
    InvalidCharacters(String),

    #[error("invalid slug: {0} characters exceeds the limit of {MAX_SLUG_LEN}")]
    TooLong(usize),
}

/// A validated world identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorldSlug(String);

impl WorldSlug {
    /// Validate an explicit slug.
    pub fn parse(raw: &str) -> Result<Self, SlugError> {
        if raw.is_empty() {
            return Err(SlugError::Empty);
        }
        if raw.contains("..") || raw.contains('/') || raw.contains('\\') {
            return Err(SlugError::Traversal(raw.to_string()));
        }
        if raw.len() > MAX_SLUG_LEN {
            return Err(SlugError::TooLong(raw.len()));
        }
        if raw.starts_with(['.', '-']) || raw.ends_with(['.', '-']) {
            return Err(SlugError::BadEdge(raw.to_string()));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(SlugError::InvalidCharacters(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorldSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for WorldSlug {
    type Error = SlugError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<WorldSlug> for String {
    fn from(slug: WorldSlug) -> Self {
        slug.0
    }
}

/// Derive a slug from a world title.
///
/// Characters outside `[a-z0-9- ]` are dropped, whitespace runs become a
/// single dash. A title with nothing usable becomes `"world"`.
pub fn slugify(title: &str) -> Result<WorldSlug, SlugError> {
    let lowered = title.trim().to_lowercase();
    let mut slug = String::with_capacity(lowered.len());
    let mut pending_dash = false;

    for c in lowered.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else if c == '-' || c.is_whitespace() {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        slug.push_str("world");
    }
    WorldSlug::parse(&slug)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_title() {
        assert_eq!(slugify("The Brass Lantern").unwrap().as_str(), "the-brass-lantern");
        assert_eq!(slugify("  Rust & Rain -- II ").unwrap().as_str(), "rust-rain-ii");
        assert_eq!(slugify("!!!").unwrap().as_str(), "world");
    }

    #[test]
    fn test_slugify_too_long() {
        let title = "a".repeat(150);
        assert_eq!(slugify(&title), Err(SlugError::TooLong(150)));
    }

    #[test]
    fn test_parse_rejects_traversal() {
        for bad in ["../etc", "a/b", "a\\b", "..", "x..y"] {
            assert!(matches!(WorldSlug::parse(bad), Err(SlugError::Traversal(_))), "{bad}");
        }
    }

    #[test]
    fn test_parse_rejects_edges_and_case() {
        assert!(matches!(WorldSlug::parse(".hidden"), Err(SlugError::BadEdge(_))));
        assert!(matches!(WorldSlug::parse("-dash"), Err(SlugError::BadEdge(_))));
        assert!(matches!(WorldSlug::parse("dash-"), Err(SlugError::BadEdge(_))));
        assert!(matches!(
            WorldSlug::parse("Upper"),
            Err(SlugError::InvalidCharacters(_))
        ));
        assert_eq!(WorldSlug::parse(""), Err(SlugError::Empty));
    }

    #[test]
    fn test_parse_accepts_valid() {
        assert_eq!(WorldSlug::parse("a").unwrap().as_str(), "a");
        assert_eq!(WorldSlug::parse("harbor-7").unwrap().to_string(), "harbor-7");
    }

    #[test]
    fn test_serde_validates() {
        let ok: WorldSlug = serde_json::from_str("\"tidewater\"").unwrap();
        assert_eq!(ok.as_str(), "tidewater");
        assert!(serde_json::from_str::<WorldSlug>("\"../up\"").is_err());
    }
}
