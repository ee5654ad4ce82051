//! Embedding provider seam and the Ollama client.
//!
//! The [`Embedder`] trait is the boundary the coordinator and the retrieval
//! service call through; [`OllamaEmbedder`] implements it against a local
//! Ollama instance's `POST /api/embeddings` endpoint. Input text is
//! normalized before embedding and the returned vector is L2-normalized to
//! unit length, so cosine and inner-product rankings agree.
//!
//! Provider failures (transport errors, non-2xx status, malformed or empty
//! responses) are retryable; they go back through the caller's backoff
//! envelope. An input that is empty after normalization is a content error
//! and fails immediately.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::error::{PipelineError, PipelineResult};

/// Turns text into a fixed-length vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one text. The returned vector's length always equals
    /// [`dimensions`](Embedder::dimensions).
    async fn embed(&self, text: &str) -> PipelineResult<Vec<f32>>;

    /// Vector length this embedder produces.
    fn dimensions(&self) -> usize;
}

#[derive(Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

/// Embedding client for Ollama's `/api/embeddings` endpoint.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimensions: usize,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig, dimensions: usize) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimensions,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> PipelineResult<Vec<f32>> {
        let normalized = normalize_text(text);
        if normalized.is_empty() {
            return Err(PipelineError::Content(
                "text is empty after normalization".into(),
            ));
        }

        let url = format!("{}/api/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&OllamaEmbeddingRequest {
                model: &self.model,
                prompt: &normalized,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Provider(format!(
                "embedding endpoint returned {status}: {body}"
            )));
        }

        let payload: OllamaEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Provider(format!("malformed embedding response: {e}")))?;

        if payload.embedding.is_empty() {
            return Err(PipelineError::Provider(
                "embedding response contained no vector".into(),
            ));
        }
        if payload.embedding.len() != self.dimensions {
            return Err(PipelineError::Provider(format!(
                "model returned {} dimensions, store expects {}",
                payload.embedding.len(),
                self.dimensions
            )));
        }

        debug!(model = %self.model, chars = normalized.len(), "embedded text");
        Ok(l2_normalize(payload.embedding))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Collapse whitespace, strip special characters (keeping `.` and `-`),
/// lowercase, and trim.
pub fn normalize_text(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() || c == '.' || c == '-' {
                c
            } else {
                ' '
            }
        })
        .collect();
    cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Scale a vector to unit L2 length. The zero vector passes through
/// unchanged.
pub fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

/// Cosine similarity in `[-1, 1]`. Returns `0.0` for empty or
/// length-mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}
