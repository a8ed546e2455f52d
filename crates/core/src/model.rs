use crate::error::ModelError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_CHAT_MODEL: &str = "openhermes";

/// Text completion for a single prompt.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError>;
}

#[derive(Debug, Clone, Copy)]
pub struct SamplingOptions {
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_p: 0.7,
        }
    }
}

/// Ollama's non-streaming `/api/generate`.
pub struct OllamaModel {
    endpoint: String,
    model: String,
    sampling: SamplingOptions,
    stop: Vec<String>,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl OllamaModel {
    pub fn new(base_url: &str, model: impl Into<String>) -> Self {
        Self {
            endpoint: format!("{}/api/generate", base_url.trim_end_matches('/')),
            model: model.into(),
            sampling: SamplingOptions::default(),
            stop: Vec::new(),
            client: Client::new(),
        }
    }

    pub fn with_sampling(mut self, sampling: SamplingOptions) -> Self {
        self.sampling = sampling;
        self
    }

    /// Generation halts before the model writes any of these sequences.
    pub fn with_stop<I, S>(mut self, stop: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stop = stop.into_iter().map(Into::into).collect();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        debug!(model = %self.model, prompt_chars = prompt.len(), "requesting completion");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "model": self.model,
                "prompt": prompt,
                "stream": false,
                "options": {
                    "temperature": self.sampling.temperature,
                    "top_p": self.sampling.top_p,
                    "stop": self.stop,
                },
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::BackendResponse {
                backend: "ollama".to_string(),
                details: format!("{status}: {body}"),
            });
        }

        let payload: GenerateResponse = response.json().await?;
        if payload.response.trim().is_empty() {
            return Err(ModelError::EmptyCompletion);
        }
        Ok(payload.response)
    }
}
