//! Anthropic Messages API backend.

use crate::http::{self, check_status, transport_error};
use crate::{blended_cost, GenerationParams, Prompt, ProviderError, TextGeneration, TextProvider, Usage};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

const API_BASE: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const NAME: &str = "anthropic";

/// Claude text backend.
#[derive(Clone)]
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: http::client(),
            api_key: api_key.into(),
            base_url: API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Create a provider from the ANTHROPIC_API_KEY environment variable.
    pub fn from_env() -> Option<Self> {
        std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .map(Self::new)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_headers(&self) -> Result<HeaderMap, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| ProviderError::auth(NAME, format!("invalid API key: {e}")))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        Ok(headers)
    }

    fn build_request<'a>(&'a self, prompt: &'a Prompt, params: &'a GenerationParams) -> ApiRequest<'a> {
        ApiRequest {
            model: params.model.as_deref().unwrap_or(&self.model),
            max_tokens: params.max_tokens,
            system: prompt.system.as_deref(),
            messages: vec![ApiMessage {
                role: "user",
                content: &prompt.user,
            }],
            // Anthropic caps temperature at 1.0
            temperature: params.temperature.map(|t| t.min(1.0)),
        }
    }
}

#[async_trait]
impl TextProvider for AnthropicProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    fn validate_model(&self, model: &str) -> bool {
        model.starts_with("claude-")
    }

    fn estimate_cost(&self, model: &str, token_count: usize) -> f64 {
        let per_million = if model.contains("opus") {
            45.0
        } else if model.contains("haiku") {
            2.4
        } else {
            9.0
        };
        blended_cost(token_count, per_million)
    }

    async fn generate(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<TextGeneration, ProviderError> {
        let request = self.build_request(prompt, params);
        debug!(model = request.model, max_tokens = request.max_tokens, "anthropic request");

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .headers(self.build_headers()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(NAME, e))?;
        let response = check_status(NAME, response).await?;

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid_response(NAME, e.to_string()))?;

        parse_response(api_response)
    }
}

fn parse_response(api_response: ApiResponse) -> Result<TextGeneration, ProviderError> {
    let text: String = api_response
        .content
        .iter()
        .filter_map(|block| match block {
            ApiContent::Text { text } => Some(text.as_str()),
            ApiContent::Other => None,
        })
        .collect();

    Ok(TextGeneration {
        content: http::non_empty_text(NAME, text)?,
        model: api_response.model,
        usage: Usage {
            input_tokens: api_response.usage.input_tokens,
            output_tokens: api_response.usage.output_tokens,
        },
    })
}

// ============================================================================
// API wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<ApiMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    content: Vec<ApiContent>,
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContent {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: usize,
    output_tokens: usize,
}
