//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and two concrete providers:
//! - **[`OllamaEmbedder`]** — POSTs `{model, prompt}` to a local Ollama
//!   embeddings endpoint.
//! - **[`OpenAiEmbedder`]** — POSTs `{model, input}` to an OpenAI-compatible
//!   `/v1/embeddings` endpoint with bearer auth.
//!
//! Both verify that the returned vector has the configured dimensionality;
//! a mismatch is an [`EmbeddingError::DimensionMismatch`], never a silently
//! truncated vector.
//!
//! # Provider Selection
//!
//! Use [`create_embedder`] to instantiate the provider named in
//! `[embeddings] provider`.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use crate::config::{Config, EmbeddingsConfig};

/// Errors surfaced by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding transport error: {0}")]
    Transport(String),
    #[error("embedding API error: {0}")]
    Api(String),
    #[error("empty embedding response")]
    EmptyResponse,
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(err: reqwest::Error) -> Self {
        EmbeddingError::Transport(err.to_string())
    }
}

/// Text → fixed-dimensional vector.
///
/// Deterministic for a given (provider, model, text) triple. The core never
/// assumes a particular provider, only that vectors have the configured
/// `vector_size`.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
}

/// Instantiate the embedding provider named in the configuration.
pub fn create_embedder(config: &Config) -> anyhow::Result<Box<dyn Embedder>> {
    let dims = config.vector_index.vector_size;
    match config.embeddings.provider.as_str() {
        "ollama" => Ok(Box::new(OllamaEmbedder::new(&config.embeddings, dims)?)),
        "openai" => Ok(Box::new(OpenAiEmbedder::new(&config.embeddings, dims)?)),
        other => anyhow::bail!("Unknown embeddings provider: {}", other),
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client, EmbeddingError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(EmbeddingError::from)
}

// ============ Ollama ============

/// Embedding provider backed by a local Ollama instance.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingsConfig, dims: usize) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            dims,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let body = json!({
            "model": self.model,
            "prompt": text,
        });

        let resp = self.client.post(&self.endpoint).json(&body).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(EmbeddingError::Api(format!("{}: {}", status, body_text)));
        }

        #[derive(serde::Deserialize)]
        struct OllamaResponse {
            #[serde(default)]
            embedding: Vec<f32>,
            #[serde(default)]
            error: String,
        }

        let parsed: OllamaResponse = resp.json().await?;
        if !parsed.error.is_empty() {
            return Err(EmbeddingError::Api(parsed.error));
        }
        check_dims(parsed.embedding, self.dims)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

// ============ OpenAI-compatible ============

/// Embedding provider for OpenAI-compatible `/v1/embeddings` endpoints.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    dims: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingsConfig, dims: usize) -> anyhow::Result<Self> {
        if config.api_key.is_empty() {
            anyhow::bail!(
                "embeddings.api_key not configured (set OPENAI_API_KEY or use a ${{VAR}} placeholder)"
            );
        }
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            dims,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let body = json!({
            "model": self.model,
            "input": text,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(EmbeddingError::Api(format!("{}: {}", status, body_text)));
        }

        let parsed: serde_json::Value = resp.json().await?;
        let embedding = parsed
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|a| a.first())
            .and_then(|item| item.get("embedding"))
            .and_then(|e| e.as_array())
            .ok_or(EmbeddingError::EmptyResponse)?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect::<Vec<f32>>();

        check_dims(embedding, self.dims)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

fn check_dims(embedding: Vec<f32>, expected: usize) -> Result<Vec<f32>, EmbeddingError> {
    if embedding.is_empty() {
        return Err(EmbeddingError::EmptyResponse);
    }
    if embedding.len() != expected {
        return Err(EmbeddingError::DimensionMismatch {
            expected,
            actual: embedding.len(),
        });
    }
    Ok(embedding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_dims_accepts_exact() {
        let v = check_dims(vec![0.0; 4], 4).unwrap();
        assert_eq!(v.len(), 4);
    }

    #[test]
    fn test_check_dims_rejects_empty() {
        assert!(matches!(
            check_dims(vec![], 4),
            Err(EmbeddingError::EmptyResponse)
        ));
    }

    #[test]
    fn test_check_dims_rejects_mismatch() {
        assert!(matches!(
            check_dims(vec![0.0; 3], 4),
            Err(EmbeddingError::DimensionMismatch {
                expected: 4,
                actual: 3
            })
        ));
    }
}
