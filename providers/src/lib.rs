//! Text and image generation providers.
//!
//! This crate defines the capability contract every generation backend
//! implements, plus the concrete HTTP backends:
//! - [`TextProvider`]: turns an assembled prompt into prose
//! - [`ImageProvider`]: turns a scene prompt into image bytes
//! - [`ProviderRegistry`]: name-keyed lookup built from API keys
//!
//! A provider call either returns a complete result or fails with a typed
//! [`ProviderError`]. Empty or undecodable replies are reported as
//! [`ProviderError::InvalidResponse`], never passed through.

pub mod anthropic;
mod http;
pub mod huggingface;
pub mod images;
pub mod openai;
pub mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use anthropic::AnthropicProvider;
pub use huggingface::{HuggingFaceImageProvider, HuggingFaceTextProvider};
pub use images::{FalProvider, PollinationsProvider, ReplicateProvider};
pub use openai::{OpenAiBackend, OpenAiCompatible, OpenAiImageProvider};
pub use registry::{
    image_provider, text_provider, ProviderKeys, ProviderRegistry, RegistryError, IMAGE_PROVIDERS,
    TEXT_PROVIDERS,
};

/// Errors a provider call can fail with.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{provider} authentication failed: {reason}")]
    Auth { provider: String, reason: String },

    #[error("{provider} rate limit reached")]
    RateLimit {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("{provider} unavailable: {reason}")]
    Unavailable { provider: String, reason: String },

    #[error("{provider} returned an invalid response: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

impl ProviderError {
    pub fn auth(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Auth {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn unavailable(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_response(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// A bounded wait at the call boundary expired.
    pub fn timed_out(provider: impl Into<String>, after: Duration) -> Self {
        Self::unavailable(provider, format!("no response after {after:?}"))
    }

    /// Name of the provider that produced this error.
    pub fn provider(&self) -> &str {
        match self {
            Self::Auth { provider, .. }
            | Self::RateLimit { provider, .. }
            | Self::Unavailable { provider, .. }
            | Self::InvalidResponse { provider, .. } => provider,
        }
    }
}

/// The text handed to a text provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    /// Standing instructions (role, output format).
    pub system: Option<String>,
    /// The assembled story context, ending at the generation point.
    pub user: String,
}

impl Prompt {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            system: None,
            user: user.into(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Rough token count (four characters per token).
    pub fn estimated_tokens(&self) -> usize {
        let chars = self.system.as_deref().map_or(0, str::len) + self.user.len();
        chars.div_ceil(4)
    }
}

/// Sampling parameters for a text call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    /// Model to use; `None` means the provider's default.
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: usize,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: None,
            temperature: None,
            max_tokens: 4096,
        }
    }
}

impl GenerationParams {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Token usage reported by a provider (estimated when the API omits it).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl Usage {
    pub fn total(&self) -> usize {
        self.input_tokens + self.output_tokens
    }
}

/// A completed text generation.
#[derive(Debug, Clone, PartialEq)]
pub struct TextGeneration {
    pub content: String,
    /// Model that actually served the request.
    pub model: String,
    pub usage: Usage,
}

/// Output framing for an image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "4:3")]
    Classic,
    #[serde(rename = "9:16")]
    Portrait,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Landscape => "16:9",
            AspectRatio::Square => "1:1",
            AspectRatio::Classic => "4:3",
            AspectRatio::Portrait => "9:16",
        }
    }

    /// Pixel dimensions for backends that take explicit sizes.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            AspectRatio::Landscape => (1344, 768),
            AspectRatio::Square => (1024, 1024),
            AspectRatio::Classic => (1152, 896),
            AspectRatio::Portrait => (768, 1344),
        }
    }
}

/// Style parameters for an image call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageStyle {
    /// Model to use; `None` means the provider's default.
    pub model: Option<String>,
    pub aspect_ratio: AspectRatio,
}

impl ImageStyle {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// A rendered image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    /// File extension matching the encoded bytes.
    pub extension: String,
    pub model: String,
}

/// Capability set of a text generation backend.
#[async_trait]
pub trait TextProvider: Send + Sync {
    /// Registry name (`"openai"`, `"anthropic"`, ...).
    fn name(&self) -> &str;

    fn default_model(&self) -> &str;

    /// Whether this backend accepts the given model identifier.
    fn validate_model(&self, model: &str) -> bool;

    /// Estimated USD cost of processing `token_count` tokens with `model`.
    fn estimate_cost(&self, model: &str, token_count: usize) -> f64;

    /// Generate prose for the prompt.
    async fn generate(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<TextGeneration, ProviderError>;
}

/// Capability set of an image generation backend.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;

    fn default_model(&self) -> &str;

    fn validate_model(&self, model: &str) -> bool;

    /// Estimated USD cost of one image with `model`.
    fn estimate_cost(&self, model: &str) -> f64;

    /// Render the prompt to image bytes.
    async fn generate(
        &self,
        prompt: &str,
        style: &ImageStyle,
    ) -> Result<GeneratedImage, ProviderError>;
}

/// Per-million-token price for a blended input/output workload.
pub(crate) fn blended_cost(token_count: usize, usd_per_million: f64) -> f64 {
    token_count as f64 * usd_per_million / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_builder() {
        let prompt = Prompt::new("Write chapter 1").with_system("You are a storyteller");
        assert_eq!(prompt.user, "Write chapter 1");
        assert_eq!(prompt.system.as_deref(), Some("You are a storyteller"));
    }

    #[test]
    fn test_prompt_token_estimate() {
        let prompt = Prompt::new("abcd".repeat(10)).with_system("abcd");
        assert_eq!(prompt.estimated_tokens(), 11);
    }

    #[test]
    fn test_params_clamp_temperature() {
        let params = GenerationParams::default().with_temperature(3.5);
        assert_eq!(params.temperature, Some(2.0));
        assert_eq!(params.max_tokens, 4096);
    }

    #[test]
    fn test_error_display_and_provider() {
        let err = ProviderError::auth("openai", "bad key");
        assert_eq!(err.to_string(), "openai authentication failed: bad key");
        assert_eq!(err.provider(), "openai");

        let err = ProviderError::timed_out("groq", Duration::from_secs(5));
        assert!(matches!(err, ProviderError::Unavailable { .. }));
    }

    #[test]
    fn test_aspect_ratio() {
        assert_eq!(AspectRatio::default().as_str(), "16:9");
        assert_eq!(AspectRatio::Square.dimensions(), (1024, 1024));
    }
}
