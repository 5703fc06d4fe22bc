//! Image backends that hand back a link or raw bytes: Pollinations, Fal, Replicate.

use crate::http::{self, check_status, download_image, transport_error, MAX_IMAGE_BYTES};
use crate::{AspectRatio, GeneratedImage, ImageProvider, ImageStyle, ProviderError};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

// ============================================================================
// Pollinations
// ============================================================================

/// Free, keyless image generation addressed entirely by URL.
#[derive(Clone)]
pub struct PollinationsProvider {
    client: reqwest::Client,
    base_url: String,
    max_bytes: usize,
}

impl Default for PollinationsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl PollinationsProvider {
    pub fn new() -> Self {
        Self {
            client: http::client(),
            base_url: "https://image.pollinations.ai".to_string(),
            max_bytes: MAX_IMAGE_BYTES,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    fn url_for(&self, prompt: &str, model: &str, aspect_ratio: AspectRatio) -> String {
        let (width, height) = aspect_ratio.dimensions();
        format!(
            "{}/prompt/{}?width={width}&height={height}&model={}&nologo=true",
            self.base_url,
            urlencoding::encode(prompt),
            urlencoding::encode(model),
        )
    }
}

#[async_trait]
impl ImageProvider for PollinationsProvider {
    fn name(&self) -> &str {
        "pollinations"
    }

    fn default_model(&self) -> &str {
        "flux"
    }

    fn validate_model(&self, model: &str) -> bool {
        matches!(model, "flux" | "flux-realism" | "flux-anime" | "flux-3d" | "turbo")
    }

    fn estimate_cost(&self, _model: &str) -> f64 {
        0.0
    }

    async fn generate(
        &self,
        prompt: &str,
        style: &ImageStyle,
    ) -> Result<GeneratedImage, ProviderError> {
        let model = style.model.as_deref().unwrap_or(self.default_model());
        let url = self.url_for(prompt, model, style.aspect_ratio);
        debug!(model, "pollinations request");

        let bytes = download_image(&self.client, self.name(), &url, self.max_bytes).await?;
        Ok(GeneratedImage {
            bytes,
            extension: "png".to_string(),
            model: model.to_string(),
        })
    }
}

// ============================================================================
// Fal
// ============================================================================

/// fal.ai hosted Flux models.
#[derive(Clone)]
pub struct FalProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    max_bytes: usize,
}

impl FalProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: http::client(),
            api_key: api_key.into(),
            base_url: "https://fal.run/fal-ai".to_string(),
            max_bytes: MAX_IMAGE_BYTES,
        }
    }

    fn image_size(aspect_ratio: AspectRatio) -> &'static str {
        match aspect_ratio {
            AspectRatio::Landscape => "landscape_16_9",
            AspectRatio::Square => "square",
            AspectRatio::Classic => "landscape_4_3",
            AspectRatio::Portrait => "portrait_16_9",
        }
    }
}

#[derive(Debug, Deserialize)]
struct FalResponse {
    images: Vec<FalImage>,
}

#[derive(Debug, Deserialize)]
struct FalImage {
    url: String,
}

#[async_trait]
impl ImageProvider for FalProvider {
    fn name(&self) -> &str {
        "fal"
    }

    fn default_model(&self) -> &str {
        "flux/dev"
    }

    fn validate_model(&self, model: &str) -> bool {
        model.starts_with("flux")
    }

    fn estimate_cost(&self, model: &str) -> f64 {
        if model.contains("flux/dev") {
            0.025
        } else if model.contains("flux/schnell") {
            0.003
        } else {
            0.01
        }
    }

    async fn generate(
        &self,
        prompt: &str,
        style: &ImageStyle,
    ) -> Result<GeneratedImage, ProviderError> {
        let model = style.model.as_deref().unwrap_or(self.default_model());
        let body = serde_json::json!({
            "prompt": prompt,
            "image_size": Self::image_size(style.aspect_ratio),
            "num_inference_steps": 28,
            "num_images": 1,
        });

        let response = self
            .client
            .post(format!("{}/{model}", self.base_url))
            .header("Authorization", format!("Key {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("fal", e))?;
        let response = check_status("fal", response).await?;

        let result: FalResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid_response("fal", e.to_string()))?;
        let url = result
            .images
            .first()
            .map(|i| i.url.as_str())
            .ok_or_else(|| ProviderError::invalid_response("fal", "no images returned"))?;

        let bytes = download_image(&self.client, "fal", url, self.max_bytes).await?;
        Ok(GeneratedImage {
            bytes,
            extension: "png".to_string(),
            model: model.to_string(),
        })
    }
}

// ============================================================================
// Replicate
// ============================================================================

/// Replicate predictions API, run synchronously with `Prefer: wait`.
#[derive(Clone)]
pub struct ReplicateProvider {
    client: reqwest::Client,
    api_token: String,
    base_url: String,
    max_bytes: usize,
}

impl ReplicateProvider {
    pub fn new(api_token: impl Into<String>) -> Self {
        Self {
            client: http::client(),
            api_token: api_token.into(),
            base_url: "https://api.replicate.com/v1".to_string(),
            max_bytes: MAX_IMAGE_BYTES,
        }
    }

    fn model_path(model: &str) -> &'static str {
        match model {
            "flux-schnell" => "black-forest-labs/flux-schnell",
            _ => "black-forest-labs/flux-dev",
        }
    }

    fn input_for(prompt: &str, model: &str, aspect_ratio: AspectRatio) -> serde_json::Value {
        let mut input = serde_json::json!({
            "prompt": prompt,
            "aspect_ratio": aspect_ratio.as_str(),
            "output_format": "png",
            "output_quality": 90,
        });
        if model == "flux-dev" {
            input["guidance"] = 3.5.into();
            input["num_inference_steps"] = 28.into();
        }
        input
    }
}

#[derive(Debug, Deserialize)]
struct Prediction {
    status: String,
    #[serde(default)]
    output: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

impl Prediction {
    fn output_url(&self) -> Option<&str> {
        match self.output.as_ref()? {
            serde_json::Value::String(url) => Some(url),
            serde_json::Value::Array(items) => items.first()?.as_str(),
            _ => None,
        }
    }
}

#[async_trait]
impl ImageProvider for ReplicateProvider {
    fn name(&self) -> &str {
        "replicate"
    }

    fn default_model(&self) -> &str {
        "flux-dev"
    }

    fn validate_model(&self, model: &str) -> bool {
        matches!(model, "flux-dev" | "flux-schnell")
    }

    fn estimate_cost(&self, model: &str) -> f64 {
        match model {
            "flux-dev" => 0.025,
            "flux-schnell" => 0.003,
            _ => 0.02,
        }
    }

    async fn generate(
        &self,
        prompt: &str,
        style: &ImageStyle,
    ) -> Result<GeneratedImage, ProviderError> {
        let model = style.model.as_deref().unwrap_or(self.default_model());
        if !self.validate_model(model) {
            return Err(ProviderError::invalid_response(
                "replicate",
                format!("unknown model {model}"),
            ));
        }

        let response = self
            .client
            .post(format!(
                "{}/models/{}/predictions",
                self.base_url,
                Self::model_path(model)
            ))
            .bearer_auth(&self.api_token)
            .header("Prefer", "wait")
            .json(&serde_json::json!({
                "input": Self::input_for(prompt, model, style.aspect_ratio)
            }))
            .send()
            .await
            .map_err(|e| transport_error("replicate", e))?;
        let response = check_status("replicate", response).await?;

        let prediction: Prediction = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid_response("replicate", e.to_string()))?;

        match prediction.status.as_str() {
            "succeeded" => {}
            "failed" | "canceled" => {
                return Err(ProviderError::invalid_response(
                    "replicate",
                    prediction.error.unwrap_or_else(|| prediction.status.clone()),
                ))
            }
            other => {
                return Err(ProviderError::unavailable(
                    "replicate",
                    format!("prediction still {other} after waiting"),
                ))
            }
        }

        let url = prediction
            .output_url()
            .ok_or_else(|| ProviderError::invalid_response("replicate", "no output url"))?;
        let bytes = download_image(&self.client, "replicate", url, self.max_bytes).await?;

        Ok(GeneratedImage {
            bytes,
            extension: "png".to_string(),
            model: model.to_string(),
        })
    }
}
