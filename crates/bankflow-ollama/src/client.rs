//! Raw Ollama HTTP client.

use std::time::Duration;

use bankflow::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

const GENERATE_TIMEOUT: Duration = Duration::from_secs(120);
const EMBED_TIMEOUT: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Sampling options forwarded to `/api/generate`.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub num_predict: i32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            num_predict: 500,
        }
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    options: &'a GenerateOptions,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

/// Ollama client with configurable base URL and model.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    /// Client for `base_url` (e.g. `http://localhost:11434`) and a default
    /// generation model.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    /// Override the generation model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// The configured generation model.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The configured endpoint.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Generate a completion. 120 s budget.
    ///
    /// # Errors
    ///
    /// `ExternalService` on connection failure, timeout, or non-success
    /// status.
    pub async fn generate(
        &self,
        prompt: &str,
        system: Option<&str>,
        options: &GenerateOptions,
    ) -> Result<String> {
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            system,
            stream: false,
            options,
        };
        let response = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .timeout(GENERATE_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::external(format!("Ollama generate failed: {e}")))?
            .error_for_status()
            .map_err(|e| Error::external(format!("Ollama generate failed: {e}")))?;

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::external(format!("Ollama returned invalid JSON: {e}")))?;
        debug!(chars = parsed.response.len(), "Ollama generation complete");
        Ok(parsed.response.trim().to_string())
    }

    /// Embed a single text with `model`. 30 s budget.
    pub async fn embed_with_model(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        let body = EmbeddingsRequest { model, prompt: text };
        let response = self
            .http
            .post(format!("{}/api/embeddings", self.base_url))
            .timeout(EMBED_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::external(format!("Ollama embeddings failed: {e}")))?
            .error_for_status()
            .map_err(|e| Error::external(format!("Ollama embeddings failed: {e}")))?;

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| Error::external(format!("Ollama returned invalid JSON: {e}")))?;
        if parsed.embedding.is_empty() {
            return Err(Error::external("Ollama returned an empty embedding"));
        }
        Ok(parsed.embedding)
    }

    /// Whether the endpoint answers at all. 3 s budget, never errors.
    pub async fn is_available(&self) -> bool {
        self.http
            .get(format!("{}/api/tags", self.base_url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}
