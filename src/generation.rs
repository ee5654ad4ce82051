//! Answer-generation seam and the Ollama client.
//!
//! [`Generator`] is consumed downstream of retrieval by
//! [`answer`](crate::answer); [`OllamaGenerator`] implements it against
//! `POST /api/generate` with streaming disabled.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::GenerationConfig;
use crate::error::{PipelineError, PipelineResult};

/// Produces free text from a context-augmented prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> PipelineResult<String>;
}

#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    #[serde(default)]
    response: String,
}

/// Generation client for Ollama's `/api/generate` endpoint.
pub struct OllamaGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, prompt: &str) -> PipelineResult<String> {
        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&OllamaGenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Provider(format!(
                "generation endpoint returned {status}: {body}"
            )));
        }

        let payload: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Provider(format!("malformed generation response: {e}")))?;

        let answer = payload.response.trim().to_string();
        if answer.is_empty() {
            return Err(PipelineError::Provider(
                "generation response contained no text".into(),
            ));
        }
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn generator_for(server: &MockServer) -> OllamaGenerator {
        let config = GenerationConfig {
            base_url: server.base_url(),
            model: "llama3.2:latest".to_string(),
            timeout_secs: 5,
        };
        OllamaGenerator::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_generate_trims_response() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .json_body_partial(r#"{"stream": false}"#);
                then.status(200)
                    .json_body(serde_json::json!({ "response": "  The answer.\n" }));
            })
            .await;

        let generator = generator_for(&server);
        let answer = generator.generate("Question: why?").await.unwrap();
        mock.assert_async().await;
        assert_eq!(answer, "The answer.");
    }

    #[tokio::test]
    async fn test_empty_response_is_provider_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(200).json_body(serde_json::json!({}));
            })
            .await;

        let generator = generator_for(&server);
        let err = generator.generate("prompt").await.unwrap_err();
        assert!(matches!(err, PipelineError::Provider(_)));
    }

    #[tokio::test]
    async fn test_server_error_is_provider_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(500).body("model not loaded");
            })
            .await;

        let generator = generator_for(&server);
        let err = generator.generate("prompt").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
