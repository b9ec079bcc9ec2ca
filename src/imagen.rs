use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    clock::Clock,
    config::VertexSettings,
    models::{GenerateOptions, GenerationResult},
    rate_limit::RateLimiter,
    retry::{with_retry, RetryPolicy, Transient},
};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("no images were generated")]
    NoImages,
    #[error("prompt must not be empty")]
    EmptyPrompt,
}

impl Transient for GenerationError {
    fn is_transient(&self) -> bool {
        match self {
            GenerationError::Api { status, message } => *status == 429 || mentions_quota(message),
            GenerationError::Http(e) => e.status().is_some_and(|s| s.as_u16() == 429),
            _ => false,
        }
    }
}

fn mentions_quota(message: &str) -> bool {
    message.contains("RESOURCE_EXHAUSTED") || message.contains("Too Many Requests") || message.contains("429")
}

/// Anything that turns a prompt into an image.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    fn model(&self) -> &str;

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<GenerationResult, GenerationError>;
}

// Truncate base64 image payloads in JSON for cleaner logging
fn truncate_base64_in_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key == "bytesBase64Encoded" {
                    if let Value::String(s) = val {
                        let total = s.chars().count();
                        if total > 100 {
                            let head: String = s.chars().take(50).collect();
                            *val = Value::String(format!("{}...[truncated {} chars]", head, total - 50));
                        }
                    }
                } else {
                    truncate_base64_in_json(val);
                }
            }
        }
        Value::Array(arr) => {
            for val in arr.iter_mut() {
                truncate_base64_in_json(val);
            }
        }
        _ => {}
    }
}

/// Client for the Vertex AI Imagen `:predict` endpoint.
#[derive(Clone)]
pub struct ImagenClient {
    client: Client,
    base_url: String,
    project: String,
    location: String,
    access_token: String,
    model: String,
}

impl ImagenClient {
    pub fn new(settings: &VertexSettings) -> Self {
        Self {
            client: Client::new(),
            base_url: settings.api_base.clone(),
            project: settings.project.clone(),
            location: settings.location.clone(),
            access_token: settings.access_token.clone(),
            model: settings.model.clone(),
        }
    }

    /// Same credentials and endpoint, different model.
    pub fn with_model(&self, model: impl Into<String>) -> Self {
        Self { model: model.into(), ..self.clone() }
    }

    fn predict_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/locations/{}/publishers/google/models/{}:predict",
            self.base_url, self.project, self.location, self.model
        )
    }

    fn request_body(prompt: &str, options: &GenerateOptions) -> Result<Value, GenerationError> {
        let mut parameters = serde_json::Map::new();
        parameters.insert("sampleCount".to_string(), json!(1));
        if let Value::Object(overrides) =
            serde_json::to_value(options).map_err(|e| GenerationError::Parse(e.to_string()))?
        {
            parameters.extend(overrides);
        }
        Ok(json!({
            "instances": [{ "prompt": prompt }],
            "parameters": parameters,
        }))
    }
}

#[async_trait]
impl ImageGenerator for ImagenClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<GenerationResult, GenerationError> {
        if prompt.trim().is_empty() {
            return Err(GenerationError::EmptyPrompt);
        }

        let url = self.predict_url();
        let body = Self::request_body(prompt, options)?;
        info!(
            "🎨 Generating image with {}: \"{}...\"",
            self.model,
            prompt.chars().take(50).collect::<String>()
        );
        debug!("📤 Request body: {}", body);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let response_text = response.text().await?;
        if !status.is_success() {
            error!("❌ Imagen API error {}: {}", status, response_text);
            return Err(GenerationError::Api { status: status.as_u16(), message: response_text });
        }

        if tracing::enabled!(tracing::Level::DEBUG) {
            if let Ok(mut logged) = serde_json::from_str::<Value>(&response_text) {
                truncate_base64_in_json(&mut logged);
                debug!("📥 Raw Imagen response: {}", logged);
            }
        }

        let parsed: PredictResponse = serde_json::from_str(&response_text)
            .map_err(|e| GenerationError::Parse(format!("{}: {}", e, response_text.chars().take(200).collect::<String>())))?;
        parsed.into_result()
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    #[serde(default)]
    bytes_base64_encoded: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
}

impl PredictResponse {
    fn into_result(self) -> Result<GenerationResult, GenerationError> {
        let prediction = self
            .predictions
            .into_iter()
            .find(|p| p.bytes_base64_encoded.as_deref().is_some_and(|b| !b.is_empty()))
            .ok_or(GenerationError::NoImages)?;
        let mime = prediction.mime_type.unwrap_or_else(|| "image/png".to_string());
        let data = prediction.bytes_base64_encoded.unwrap_or_default();
        Ok(GenerationResult {
            image_url: format!("data:{};base64,{}", mime, data),
            enhanced_prompt: prediction.prompt,
        })
    }
}

/// Wraps a generator with the per-model rate limiter and quota retries.
pub struct RateLimitedGenerator<G> {
    inner: G,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl<G: ImageGenerator> RateLimitedGenerator<G> {
    pub fn new(inner: G, limiter: Arc<RateLimiter>, policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { inner, limiter, policy, clock }
    }
}

#[async_trait]
impl<G: ImageGenerator> ImageGenerator for RateLimitedGenerator<G> {
    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<GenerationResult, GenerationError> {
        let model = self.inner.model();
        let limiter = self.limiter.as_ref();
        let inner = &self.inner;
        with_retry(&self.policy, self.clock.as_ref(), || async move {
            limiter.acquire(model).await;
            inner.generate(prompt, options).await
        })
        .await
    }
}

/// Generates `count` images one at a time. Once at least one image exists a
/// later failure ends the run early and returns what was produced.
pub async fn generate_many(
    generator: &dyn ImageGenerator,
    prompt: &str,
    count: u32,
    options: &GenerateOptions,
) -> Result<Vec<GenerationResult>, GenerationError> {
    let mut results = Vec::new();
    for i in 0..count.max(1) {
        info!("Generating image {}/{}...", i + 1, count.max(1));
        match generator.generate(prompt, options).await {
            Ok(result) => results.push(result),
            Err(e) if !results.is_empty() => {
                warn!("Image {}/{} failed: {}. Returning {} generated images.", i + 1, count, e, results.len());
                return Ok(results);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(results)
}
