//! Name-keyed provider lookup.

use crate::{
    AnthropicProvider, FalProvider, HuggingFaceImageProvider, HuggingFaceTextProvider,
    ImageProvider, OpenAiBackend, OpenAiCompatible, OpenAiImageProvider, PollinationsProvider,
    ReplicateProvider, TextProvider,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Every text provider name the registry can build.
pub const TEXT_PROVIDERS: &[&str] = &[
    "openai",
    "anthropic",
    "together",
    "groq",
    "openrouter",
    "gemini",
    "huggingface",
];

/// Every image provider name the registry can build.
pub const IMAGE_PROVIDERS: &[&str] = &["pollinations", "openai", "fal", "replicate", "huggingface"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown {kind} provider: {name}")]
    UnknownProvider { kind: &'static str, name: String },

    #[error("{name} needs an API key ({env_key})")]
    MissingKey { name: String, env_key: &'static str },
}

/// API keys for every supported service. Absent keys are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderKeys {
    pub openai: Option<String>,
    pub anthropic: Option<String>,
    pub together: Option<String>,
    pub groq: Option<String>,
    pub openrouter: Option<String>,
    pub gemini: Option<String>,
    pub huggingface: Option<String>,
    pub replicate: Option<String>,
    pub fal: Option<String>,
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl ProviderKeys {
    pub fn from_env() -> Self {
        Self {
            openai: env("OPENAI_API_KEY"),
            anthropic: env("ANTHROPIC_API_KEY"),
            together: env("TOGETHER_API_KEY"),
            groq: env("GROQ_API_KEY"),
            openrouter: env("OPENROUTER_API_KEY"),
            gemini: env("GEMINI_API_KEY"),
            huggingface: env("HUGGINGFACE_API_KEY"),
            replicate: env("REPLICATE_API_TOKEN"),
            fal: env("FAL_KEY"),
        }
    }

    fn for_backend(&self, backend: OpenAiBackend) -> Option<&String> {
        match backend {
            OpenAiBackend::OpenAi => self.openai.as_ref(),
            OpenAiBackend::Together => self.together.as_ref(),
            OpenAiBackend::Groq => self.groq.as_ref(),
            OpenAiBackend::OpenRouter => self.openrouter.as_ref(),
            OpenAiBackend::Gemini => self.gemini.as_ref(),
        }
    }
}

/// Build a text provider by name.
pub fn text_provider(
    name: &str,
    keys: &ProviderKeys,
) -> Result<Arc<dyn TextProvider>, RegistryError> {
    let name = name.to_lowercase();
    if let Some(backend) = OpenAiBackend::ALL.into_iter().find(|b| b.name() == name) {
        let key = keys.for_backend(backend).ok_or(RegistryError::MissingKey {
            name: name.clone(),
            env_key: backend.env_key(),
        })?;
        return Ok(Arc::new(OpenAiCompatible::new(backend, key.clone())));
    }

    match name.as_str() {
        "anthropic" => {
            let key = keys.anthropic.clone().ok_or(RegistryError::MissingKey {
                name,
                env_key: "ANTHROPIC_API_KEY",
            })?;
            Ok(Arc::new(AnthropicProvider::new(key)))
        }
        "huggingface" => Ok(Arc::new(HuggingFaceTextProvider::new(
            keys.huggingface.clone(),
        ))),
        _ => Err(RegistryError::UnknownProvider { kind: "text", name }),
    }
}

/// Build an image provider by name.
pub fn image_provider(
    name: &str,
    keys: &ProviderKeys,
) -> Result<Arc<dyn ImageProvider>, RegistryError> {
    let name = name.to_lowercase();
    let missing = |env_key| RegistryError::MissingKey {
        name: name.clone(),
        env_key,
    };

    match name.as_str() {
        "pollinations" => Ok(Arc::new(PollinationsProvider::new())),
        "huggingface" => Ok(Arc::new(HuggingFaceImageProvider::new(
            keys.huggingface.clone(),
        ))),
        "openai" => {
            let key = keys.openai.clone().ok_or_else(|| missing("OPENAI_API_KEY"))?;
            Ok(Arc::new(OpenAiImageProvider::new(key)))
        }
        "fal" => {
            let key = keys.fal.clone().ok_or_else(|| missing("FAL_KEY"))?;
            Ok(Arc::new(FalProvider::new(key)))
        }
        "replicate" => {
            let key = keys
                .replicate
                .clone()
                .ok_or_else(|| missing("REPLICATE_API_TOKEN"))?;
            Ok(Arc::new(ReplicateProvider::new(key)))
        }
        _ => Err(RegistryError::UnknownProvider {
            kind: "image",
            name: name.clone(),
        }),
    }
}

/// Providers available to a running engine, keyed by name.
///
/// Lookups for unregistered names return `None`; callers turn that into a
/// configuration error rather than silently picking another backend.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    text: BTreeMap<String, Arc<dyn TextProvider>>,
    image: BTreeMap<String, Arc<dyn ImageProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every provider the given keys allow.
    pub fn from_keys(keys: &ProviderKeys) -> Self {
        let mut registry = Self::new();
        for name in TEXT_PROVIDERS {
            if let Ok(provider) = text_provider(name, keys) {
                registry.text.insert((*name).to_string(), provider);
            }
        }
        for name in IMAGE_PROVIDERS {
            if let Ok(provider) = image_provider(name, keys) {
                registry.image.insert((*name).to_string(), provider);
            }
        }
        registry
    }

    pub fn with_text(mut self, provider: Arc<dyn TextProvider>) -> Self {
        self.register_text(provider);
        self
    }

    pub fn with_image(mut self, provider: Arc<dyn ImageProvider>) -> Self {
        self.register_image(provider);
        self
    }

    pub fn register_text(&mut self, provider: Arc<dyn TextProvider>) {
        self.text.insert(provider.name().to_string(), provider);
    }

    pub fn register_image(&mut self, provider: Arc<dyn ImageProvider>) {
        self.image.insert(provider.name().to_string(), provider);
    }

    pub fn text(&self, name: &str) -> Option<Arc<dyn TextProvider>> {
        self.text.get(&name.to_lowercase()).cloned()
    }

    pub fn image(&self, name: &str) -> Option<Arc<dyn ImageProvider>> {
        self.image.get(&name.to_lowercase()).cloned()
    }

    pub fn text_names(&self) -> impl Iterator<Item = &str> {
        self.text.keys().map(String::as_str)
    }

    pub fn image_names(&self) -> impl Iterator<Item = &str> {
        self.image.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("text", &self.text.keys().collect::<Vec<_>>())
            .field("image", &self.image.keys().collect::<Vec<_>>())
            .finish()
    }
}
