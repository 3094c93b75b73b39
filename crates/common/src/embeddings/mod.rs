//! Embedding service abstraction
//!
//! Used by the vector fallback to turn question text into a query vector.
//! Providers:
//! - OpenAI-compatible `/embeddings` endpoints
//! - A deterministic hash embedder for tests and dry runs

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// OpenAI-compatible embedding client
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: [&'a str; 1],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAIEmbedder {
    /// Create a new embedder
    pub fn new(config: &EmbeddingConfig, base_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Make request with retry
    async fn request_with_retry(&self, text: &str) -> Result<Vec<f32>> {
        let max_retries = 3;
        let mut last_error = None;

        for attempt in 0..max_retries {
            if attempt > 0 {
                // Exponential backoff
                let delay = Duration::from_millis(100 * 2_u64.pow(attempt));
                tokio::time::sleep(delay).await;
            }

            match self.make_request(text).await {
                Ok(embedding) => return Ok(embedding),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = max_retries,
                        error = %e,
                        "Embedding request failed, retrying"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::Embedding {
            message: "Unknown error after retries".to_string(),
        }))
    }

    async fn make_request(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);

        let mut request = self.client.post(&url).json(&EmbeddingRequest {
            input: [text],
            model: &self.model,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| AppError::Embedding {
            message: format!("Request failed: {}", e),
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Embedding {
                message: format!("API error {}: {}", status, body),
            });
        }

        let result: EmbeddingResponse = response.json().await.map_err(|e| AppError::Embedding {
            message: format!("Failed to parse response: {}", e),
        })?;

        result
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| AppError::Embedding {
                message: "Empty response".to_string(),
            })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.request_with_retry(text).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Deterministic embedder: the same text always yields the same vector
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut values = Vec::with_capacity(self.dimension);
        let mut block = Sha256::digest(text.as_bytes());

        while values.len() < self.dimension {
            for byte in block.iter() {
                if values.len() == self.dimension {
                    break;
                }
                values.push(f32::from(*byte) / 255.0);
            }
            block = Sha256::digest(block);
        }
        Ok(values)
    }

    fn model_name(&self) -> &str {
        "hash-embedding"
    }
}

/// Create an embedder from configuration; `None` when no API base is set
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Option<Arc<dyn Embedder>>> {
    match config.api_base.as_deref() {
        Some("hash") => Ok(Some(Arc::new(HashEmbedder::new(256)))),
        Some(base) => Ok(Some(Arc::new(OpenAIEmbedder::new(config, base.to_string())?))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::new(80);
        let a = embedder.embed("contracts about software").await.unwrap();
        let b = embedder.embed("contracts about software").await.unwrap();
        let c = embedder.embed("something else").await.unwrap();

        assert_eq!(a.len(), 80);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_create_embedder() {
        let mut config = EmbeddingConfig::default();
        assert!(create_embedder(&config).unwrap().is_none());

        config.api_base = Some("hash".to_string());
        let embedder = create_embedder(&config).unwrap().unwrap();
        assert_eq!(embedder.model_name(), "hash-embedding");

        config.api_base = Some("https://api.openai.com/v1/".to_string());
        let embedder = create_embedder(&config).unwrap().unwrap();
        assert_eq!(embedder.model_name(), "text-embedding-3-small");
    }
}
