//! Embedding provider implementations.
//!
//! Concrete [`EmbeddingProvider`] backends behind the core trait:
//! - **[`DisabledProvider`]** — fails every call; used when embeddings
//!   are not configured.
//! - **[`OpenAiProvider`]** — calls an OpenAI-compatible embeddings API
//!   with batching, retry, and exponential backoff.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use corpora_core::embedding::EmbeddingProvider;
use corpora_core::error::{EmbedError, EngineError, Result};

use crate::config::EmbeddingConfig;

/// A no-op provider that always returns errors.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed_batch(&self, _texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
        Err(EmbedError::ModelUnavailable(
            "embedding provider is disabled".into(),
        ))
    }
}

/// Provider for the OpenAI embeddings API.
///
/// Calls `POST /v1/embeddings` with the configured model. Requires the
/// `OPENAI_API_KEY` environment variable at construction time.
pub struct OpenAiProvider {
    model: String,
    dims: usize,
    api_key: String,
    batch_size: usize,
    max_retries: u32,
    client: reqwest::Client,
}

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

impl OpenAiProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            EngineError::Configuration("embedding.model required for openai provider".into())
        })?;
        let dims = config.dims.ok_or_else(|| {
            EngineError::Configuration("embedding.dims required for openai provider".into())
        })?;
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            EngineError::Configuration("OPENAI_API_KEY environment variable not set".into())
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::Configuration(format!("http client: {e}")))?;

        Ok(Self {
            model,
            dims,
            api_key,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            client,
        })
    }

    async fn embed_one_batch(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = EmbedError::ModelUnavailable("embedding failed after retries".into());

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(OPENAI_EMBEDDINGS_URL)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: EmbeddingsResponse = response.json().await.map_err(|e| {
                            EmbedError::ModelUnavailable(format!("malformed response: {e}"))
                        })?;
                        return Ok(parsed.into_vectors(texts.len())?);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 {
                        warn!(attempt, "embeddings API rate limited");
                        last_err = EmbedError::RateLimited;
                        continue;
                    }
                    if status.is_server_error() {
                        warn!(attempt, %status, "embeddings API server error");
                        last_err =
                            EmbedError::ModelUnavailable(format!("{status}: {body_text}"));
                        continue;
                    }
                    // Non-retryable client error
                    return Err(EmbedError::InvalidInput(format!("{status}: {body_text}")));
                }
                Err(e) => {
                    warn!(attempt, error = %e, "embeddings API request failed");
                    last_err = EmbedError::ModelUnavailable(e.to_string());
                    continue;
                }
            }
        }

        Err(last_err)
    }
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl EmbeddingsResponse {
    /// Reassemble vectors in input order using the `index` field.
    fn into_vectors(self, expected: usize) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
        if self.data.len() != expected {
            return Err(EmbedError::ModelUnavailable(format!(
                "expected {expected} embeddings, got {}",
                self.data.len()
            )));
        }
        let mut out = vec![Vec::new(); expected];
        for item in self.data {
            if item.index >= expected {
                return Err(EmbedError::ModelUnavailable(format!(
                    "embedding index {} out of range",
                    item.index
                )));
            }
            out[item.index] = item.embedding;
        }
        Ok(out)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            out.extend(self.embed_one_batch(batch).await?);
        }
        Ok(out)
    }
}

/// Create the configured [`EmbeddingProvider`].
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" => Ok(Box::new(OpenAiProvider::new(config)?)),
        other => Err(EngineError::Configuration(format!(
            "unknown embedding provider: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_provider_always_fails() {
        let provider = DisabledProvider;
        let err = provider.embed_batch(&["text".into()]).await.unwrap_err();
        assert!(matches!(err, EmbedError::ModelUnavailable(_)));
    }

    #[test]
    fn test_response_reordered_by_index() {
        let resp = EmbeddingsResponse {
            data: vec![
                EmbeddingItem {
                    index: 1,
                    embedding: vec![2.0],
                },
                EmbeddingItem {
                    index: 0,
                    embedding: vec![1.0],
                },
            ],
        };
        let vectors = resp.into_vectors(2).unwrap();
        assert_eq!(vectors, vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn test_response_count_mismatch_rejected() {
        let resp = EmbeddingsResponse {
            data: vec![EmbeddingItem {
                index: 0,
                embedding: vec![1.0],
            }],
        };
        assert!(resp.into_vectors(2).is_err());
    }
}
