//! OpenAI and OpenAI-compatible chat completion backends, plus OpenAI Images.
//!
//! Together, Groq, OpenRouter and Gemini all speak the `/chat/completions`
//! dialect, so one client covers them; [`OpenAiBackend`] carries the
//! per-service base URL, default model and pricing.

use crate::http::{self, check_status, transport_error};
use crate::{
    blended_cost, GenerationParams, GeneratedImage, ImageProvider, ImageStyle, Prompt,
    ProviderError, TextGeneration, TextProvider, Usage,
};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

const OPENAI_MODELS: &[&str] = &["gpt-4o", "gpt-4o-mini", "gpt-4-turbo", "gpt-4", "gpt-3.5-turbo"];

/// A service speaking the OpenAI chat completion dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAiBackend {
    OpenAi,
    Together,
    Groq,
    OpenRouter,
    Gemini,
}

impl OpenAiBackend {
    pub const ALL: [OpenAiBackend; 5] = [
        OpenAiBackend::OpenAi,
        OpenAiBackend::Together,
        OpenAiBackend::Groq,
        OpenAiBackend::OpenRouter,
        OpenAiBackend::Gemini,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            OpenAiBackend::OpenAi => "openai",
            OpenAiBackend::Together => "together",
            OpenAiBackend::Groq => "groq",
            OpenAiBackend::OpenRouter => "openrouter",
            OpenAiBackend::Gemini => "gemini",
        }
    }

    pub fn base_url(&self) -> &'static str {
        match self {
            OpenAiBackend::OpenAi => "https://api.openai.com/v1",
            OpenAiBackend::Together => "https://api.together.xyz/v1",
            OpenAiBackend::Groq => "https://api.groq.com/openai/v1",
            OpenAiBackend::OpenRouter => "https://openrouter.ai/api/v1",
            OpenAiBackend::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            OpenAiBackend::OpenAi => "gpt-4o-mini",
            OpenAiBackend::Together => "meta-llama/Meta-Llama-3.1-70B-Instruct-Turbo",
            OpenAiBackend::Groq => "llama-3.3-70b-versatile",
            OpenAiBackend::OpenRouter => "z-ai/glm-4.6",
            OpenAiBackend::Gemini => "gemini-2.5-flash",
        }
    }

    /// Environment variable holding this service's key.
    pub fn env_key(&self) -> &'static str {
        match self {
            OpenAiBackend::OpenAi => "OPENAI_API_KEY",
            OpenAiBackend::Together => "TOGETHER_API_KEY",
            OpenAiBackend::Groq => "GROQ_API_KEY",
            OpenAiBackend::OpenRouter => "OPENROUTER_API_KEY",
            OpenAiBackend::Gemini => "GEMINI_API_KEY",
        }
    }

    fn price_per_million(&self, model: &str) -> f64 {
        let model = model.to_lowercase();
        match self {
            OpenAiBackend::OpenAi if model.contains("gpt-4o-mini") => 0.375,
            OpenAiBackend::OpenAi if model.contains("gpt-4o") => 6.25,
            OpenAiBackend::OpenAi => 5.0,
            OpenAiBackend::Together if model.contains("70b") => 0.88,
            OpenAiBackend::Together => 1.0,
            OpenAiBackend::Groq if model.contains("70b") => 0.69,
            OpenAiBackend::Groq => 0.5,
            OpenAiBackend::OpenRouter if model.contains("glm-4.6") => 0.375,
            OpenAiBackend::OpenRouter if model.contains("glm-4") => 1.25,
            OpenAiBackend::OpenRouter => 1.5,
            OpenAiBackend::Gemini => 0.0,
        }
    }
}

/// Chat completion client for any [`OpenAiBackend`].
#[derive(Clone)]
pub struct OpenAiCompatible {
    client: reqwest::Client,
    backend: OpenAiBackend,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiCompatible {
    pub fn new(backend: OpenAiBackend, api_key: impl Into<String>) -> Self {
        Self {
            client: http::client(),
            backend,
            api_key: api_key.into(),
            base_url: backend.base_url().to_string(),
            model: backend.default_model().to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn backend(&self) -> OpenAiBackend {
        self.backend
    }

    fn build_request<'a>(&'a self, prompt: &'a Prompt, params: &'a GenerationParams) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &prompt.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &prompt.user,
        });

        ChatRequest {
            model: params.model.as_deref().unwrap_or(&self.model),
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        }
    }
}

#[async_trait]
impl TextProvider for OpenAiCompatible {
    fn name(&self) -> &str {
        self.backend.name()
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    fn validate_model(&self, model: &str) -> bool {
        match self.backend {
            OpenAiBackend::OpenAi => OPENAI_MODELS.contains(&model),
            _ => !model.trim().is_empty(),
        }
    }

    fn estimate_cost(&self, model: &str, token_count: usize) -> f64 {
        blended_cost(token_count, self.backend.price_per_million(model))
    }

    async fn generate(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<TextGeneration, ProviderError> {
        let name = self.backend.name();
        let request = self.build_request(prompt, params);
        if !self.validate_model(request.model) {
            return Err(ProviderError::invalid_response(
                name,
                format!("unknown model {}", request.model),
            ));
        }
        debug!(provider = name, model = request.model, "chat completion request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(name, e))?;
        let response = check_status(name, response).await?;

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid_response(name, e.to_string()))?;

        parse_chat_response(name, request.model, prompt, body)
    }
}

fn parse_chat_response(
    provider: &str,
    requested_model: &str,
    prompt: &Prompt,
    body: ChatResponse,
) -> Result<TextGeneration, ProviderError> {
    let content = body
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();
    let content = http::non_empty_text(provider, content)?;

    let usage = match body.usage {
        Some(u) => Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        },
        None => Usage {
            input_tokens: prompt.estimated_tokens(),
            output_tokens: content.len().div_ceil(4),
        },
    };

    Ok(TextGeneration {
        content,
        model: body.model.unwrap_or_else(|| requested_model.to_string()),
        usage,
    })
}

// ============================================================================
// OpenAI Images
// ============================================================================

const IMAGE_MODELS: &[&str] = &["gpt-image-1", "dall-e-3"];

/// OpenAI image generation (`/images/generations`).
#[derive(Clone)]
pub struct OpenAiImageProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiImageProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: http::client(),
            api_key: api_key.into(),
            base_url: OpenAiBackend::OpenAi.base_url().to_string(),
            model: "gpt-image-1".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn size_for(model: &str, style: &ImageStyle) -> &'static str {
        use crate::AspectRatio::*;
        match (model, style.aspect_ratio) {
            (_, Square) => "1024x1024",
            ("dall-e-3", Landscape | Classic) => "1792x1024",
            ("dall-e-3", Portrait) => "1024x1792",
            (_, Landscape | Classic) => "1536x1024",
            (_, Portrait) => "1024x1536",
        }
    }
}

#[async_trait]
impl ImageProvider for OpenAiImageProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    fn validate_model(&self, model: &str) -> bool {
        IMAGE_MODELS.contains(&model)
    }

    fn estimate_cost(&self, model: &str) -> f64 {
        if model == "dall-e-3" {
            0.08
        } else {
            0.06
        }
    }

    async fn generate(
        &self,
        prompt: &str,
        style: &ImageStyle,
    ) -> Result<GeneratedImage, ProviderError> {
        let model = style.model.as_deref().unwrap_or(&self.model);
        let mut body = serde_json::json!({
            "model": model,
            "prompt": prompt,
            "size": Self::size_for(model, style),
            "n": 1,
        });
        if model == "dall-e-3" {
            body["response_format"] = "b64_json".into();
        }

        let response = self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("openai", e))?;
        let response = check_status("openai", response).await?;

        let body: ImagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid_response("openai", e.to_string()))?;
        let encoded = body
            .data
            .into_iter()
            .next()
            .and_then(|d| d.b64_json)
            .ok_or_else(|| ProviderError::invalid_response("openai", "no image data"))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| ProviderError::invalid_response("openai", e.to_string()))?;

        Ok(GeneratedImage {
            bytes: http::non_empty_image("openai", bytes)?,
            extension: "png".to_string(),
            model: model.to_string(),
        })
    }
}

// ============================================================================
// API wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    max_tokens: usize,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    #[serde(default)]
    b64_json: Option<String>,
}
