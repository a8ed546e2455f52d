use crate::error::EmbeddingError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;
pub const DEFAULT_OLLAMA_EMBED_MODEL: &str = "nomic-embed-text";
pub const NOMIC_EMBED_DIMENSIONS: usize = 768;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    /// Hashed character-trigram counts, L2-normalized.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_text(text))
    }
}

/// Embeddings from an Ollama server's `/api/embed` endpoint.
pub struct OllamaEmbedder {
    endpoint: String,
    model: String,
    dimensions: usize,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            endpoint: format!("{}/api/embed", base_url.trim_end_matches('/')),
            model: model.into(),
            dimensions,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "model": self.model, "input": text }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EmbeddingError::BackendResponse {
                backend: "ollama".to_string(),
                details: response.status().to_string(),
            });
        }

        let payload: OllamaEmbedResponse = response.json().await?;
        let vector = payload
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::BackendResponse {
                backend: "ollama".to_string(),
                details: "response carried no embeddings".to_string(),
            })?;

        if vector.len() != self.dimensions {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }

        Ok(vector)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

fn is_transient(error: &EmbeddingError) -> bool {
    matches!(
        error,
        EmbeddingError::Http(_) | EmbeddingError::BackendResponse { .. }
    )
}

fn cache_key(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Content-addressed cache plus bounded retry around another embedder.
///
/// Text is trimmed and newlines flattened before hashing, so equal normalized
/// text is embedded once per process.
pub struct CachingEmbedder<E> {
    inner: E,
    retry: RetryPolicy,
    cache: Mutex<HashMap<String, Vec<f32>>>,
}

impl<E> CachingEmbedder<E> {
    pub fn new(inner: E, retry: RetryPolicy) -> Self {
        Self {
            inner,
            retry,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.lock().map(|cache| cache.len()).unwrap_or(0)
    }

    fn cached(&self, key: &str) -> Option<Vec<f32>> {
        self.cache.lock().ok()?.get(key).cloned()
    }

    fn remember(&self, key: String, vector: &[f32]) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, vector.to_vec());
        }
    }
}

#[async_trait]
impl<E: Embedder> Embedder for CachingEmbedder<E> {
    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let normalized = text.trim().replace('\n', " ");
        if normalized.is_empty() {
            return Err(EmbeddingError::EmptyText);
        }

        let key = cache_key(&normalized);
        if let Some(vector) = self.cached(&key) {
            return Ok(vector);
        }

        let attempts = self.retry.attempts.max(1);
        let mut last = String::new();
        for attempt in 1..=attempts {
            match self.inner.embed(&normalized).await {
                Ok(vector) => {
                    self.remember(key, &vector);
                    return Ok(vector);
                }
                Err(error) if is_transient(&error) => {
                    warn!(attempt, attempts, %error, "embedding attempt failed");
                    last = error.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.retry.delay).await;
                    }
                }
                Err(error) => return Err(error),
            }
        }

        Err(EmbeddingError::Exhausted { attempts, last })
    }
}
