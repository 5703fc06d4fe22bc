//! Hugging Face Inference API backends (text and image).
//!
//! Both work without a key on the rate-limited free tier.

use crate::http::{self, check_status, transport_error};
use crate::{
    GenerationParams, GeneratedImage, ImageProvider, ImageStyle, Prompt, ProviderError,
    TextGeneration, TextProvider, Usage,
};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

const INFERENCE_BASE: &str = "https://api-inference.huggingface.co/models";
const NAME: &str = "huggingface";

fn authorize(request: reqwest::RequestBuilder, api_key: Option<&str>) -> reqwest::RequestBuilder {
    match api_key {
        Some(key) => request.bearer_auth(key),
        None => request,
    }
}

/// Flatten a chat-style prompt into the single-string form the endpoint takes.
fn flatten_prompt(prompt: &Prompt) -> String {
    let mut parts = Vec::with_capacity(2);
    if let Some(system) = &prompt.system {
        parts.push(format!("System: {system}"));
    }
    parts.push(format!("User: {}", prompt.user));
    parts.join("\n\n") + "\n\nAssistant:"
}

/// Free-tier text generation.
#[derive(Clone)]
pub struct HuggingFaceTextProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl HuggingFaceTextProvider {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: http::client(),
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: INFERENCE_BASE.to_string(),
            model: "mistralai/Mistral-7B-Instruct-v0.3".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl TextProvider for HuggingFaceTextProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    fn validate_model(&self, model: &str) -> bool {
        model.contains('/')
    }

    fn estimate_cost(&self, _model: &str, _token_count: usize) -> f64 {
        0.0
    }

    async fn generate(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<TextGeneration, ProviderError> {
        let model = params.model.as_deref().unwrap_or(&self.model);
        let inputs = flatten_prompt(prompt);
        let body = serde_json::json!({
            "inputs": inputs,
            "parameters": {
                "temperature": params.temperature.unwrap_or(0.8),
                "max_new_tokens": params.max_tokens,
                "return_full_text": false,
            }
        });
        debug!(model, free_tier = self.api_key.is_none(), "huggingface text request");

        let request = self
            .client
            .post(format!("{}/{model}", self.base_url))
            .json(&body);
        let response = authorize(request, self.api_key.as_deref())
            .send()
            .await
            .map_err(|e| transport_error(NAME, e))?;
        let response = check_status(NAME, response).await?;

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid_response(NAME, e.to_string()))?;
        let content = parse_generated_text(&value).unwrap_or_default();
        let content = http::non_empty_text(NAME, content)?;

        Ok(TextGeneration {
            usage: Usage {
                input_tokens: inputs.len().div_ceil(4),
                output_tokens: content.len().div_ceil(4),
            },
            content,
            model: model.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct Generated {
    generated_text: String,
}

/// The endpoint answers with either `[{generated_text}]` or `{generated_text}`.
fn parse_generated_text(value: &serde_json::Value) -> Option<String> {
    let first = match value {
        serde_json::Value::Array(items) => items.first()?.clone(),
        other => other.clone(),
    };
    serde_json::from_value::<Generated>(first)
        .ok()
        .map(|g| g.generated_text)
}

/// Stable Diffusion via the Inference API; the response body is the image.
#[derive(Clone)]
pub struct HuggingFaceImageProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl HuggingFaceImageProvider {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: http::client(),
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: INFERENCE_BASE.to_string(),
            model: "stabilityai/stable-diffusion-xl-base-1.0".to_string(),
        }
    }
}

#[async_trait]
impl ImageProvider for HuggingFaceImageProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    fn validate_model(&self, model: &str) -> bool {
        model.contains('/')
    }

    fn estimate_cost(&self, _model: &str) -> f64 {
        0.0
    }

    async fn generate(
        &self,
        prompt: &str,
        style: &ImageStyle,
    ) -> Result<GeneratedImage, ProviderError> {
        let model = style.model.as_deref().unwrap_or(&self.model);
        let request = self
            .client
            .post(format!("{}/{model}", self.base_url))
            .json(&serde_json::json!({ "inputs": prompt }));
        let response = authorize(request, self.api_key.as_deref())
            .send()
            .await
            .map_err(|e| transport_error(NAME, e))?;
        let response = check_status(NAME, response).await?;

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("json"));
        if is_json {
            warn!(model, "huggingface returned json instead of an image");
            return Err(ProviderError::invalid_response(NAME, "expected image bytes"));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(NAME, e))?;

        Ok(GeneratedImage {
            bytes: http::non_empty_image(NAME, bytes.to_vec())?,
            extension: "png".to_string(),
            model: model.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_prompt() {
        let prompt = Prompt::new("Next chapter").with_system("Be vivid");
        assert_eq!(
            flatten_prompt(&prompt),
            "System: Be vivid\n\nUser: Next chapter\n\nAssistant:"
        );
    }

    #[test]
    fn test_parse_generated_text_shapes() {
        let list = serde_json::json!([{"generated_text": "A"}]);
        let object = serde_json::json!({"generated_text": "B"});
        let other = serde_json::json!({"error": "loading"});
        assert_eq!(parse_generated_text(&list).as_deref(), Some("A"));
        assert_eq!(parse_generated_text(&object).as_deref(), Some("B"));
        assert_eq!(parse_generated_text(&other), None);
    }

    #[test]
    fn test_empty_key_means_free_tier() {
        let provider = HuggingFaceTextProvider::new(Some(String::new()));
        assert!(provider.api_key.is_none());
        assert_eq!(provider.estimate_cost("any/model", 10_000), 0.0);
    }
}
