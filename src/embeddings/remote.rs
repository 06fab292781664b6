//! Remote embedding service client
//!
//! Calls a Voyage-style text embedding API with bounded retry and
//! exponential backoff. Rate-limit and transient server errors retry;
//! anything else surfaces immediately as a typed error.

use crate::error::{MetanoiaError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Default embedding dimension (voyage-3-large)
pub const DEFAULT_EMBEDDING_DIM: usize = 1536;

/// Maximum texts per batch request
const MAX_BATCH_SIZE: usize = 128;

/// Maximum retry attempts for transient failures
const MAX_RETRIES: usize = 3;

/// Backoff base duration in milliseconds
const BACKOFF_BASE_MS: u64 = 1000;

/// Request timeout duration
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Embedding provider trait; `embed(text) -> vector<float>` per the
/// collaborator contract
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batched)
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embedding dimensionality
    fn dimensions(&self) -> usize;
}

/// Remote embedding service client
pub struct RemoteEmbeddingService {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    dimensions: usize,
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    input: Vec<String>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl RemoteEmbeddingService {
    /// Create a new remote embedding service
    pub fn new(api_key: String, model: Option<String>, base_url: Option<String>) -> Result<Self> {
        if api_key.is_empty() {
            return Err(MetanoiaError::Validation(
                "embedding API key cannot be empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: model.unwrap_or_else(|| "voyage-3-large".to_string()),
            base_url: base_url.unwrap_or_else(|| "https://api.voyageai.com/v1".to_string()),
            dimensions: DEFAULT_EMBEDDING_DIM,
        })
    }

    async fn call_api(&self, texts: &[String]) -> Result<EmbedResponse> {
        let request = EmbedRequest {
            input: texts.to_vec(),
            model: self.model.clone(),
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(MetanoiaError::Embedding(format!(
                "transient embedding API failure: {}",
                status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MetanoiaError::Embedding(format!(
                "embedding API error {}: {}",
                status, body
            )));
        }

        Ok(response.json::<EmbedResponse>().await?)
    }

    /// Call the API with retry on transient failures
    async fn call_api_with_retry(&self, texts: &[String]) -> Result<EmbedResponse> {
        let mut retries = 0;

        loop {
            match self.call_api(texts).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    let transient = matches!(
                        &e,
                        MetanoiaError::Embedding(msg) if msg.starts_with("transient")
                    ) || matches!(&e, MetanoiaError::Http(err) if err.is_timeout());

                    if !transient || retries >= MAX_RETRIES {
                        return Err(e);
                    }

                    retries += 1;
                    let backoff = Duration::from_millis(BACKOFF_BASE_MS * retries as u64);
                    warn!(
                        "Embedding request failed ({}), retry {}/{} after {:?}",
                        e, retries, MAX_RETRIES, backoff
                    );
                    sleep(backoff).await;
                }
            }
        }
    }

    fn decode(&self, mut data: Vec<EmbeddingData>, expected: usize) -> Result<Vec<Vec<f32>>> {
        if data.len() != expected {
            return Err(MetanoiaError::Embedding(format!(
                "embedding API returned {} vectors for {} inputs",
                data.len(),
                expected
            )));
        }

        data.sort_by_key(|d| d.index);
        for entry in &data {
            if entry.embedding.len() != self.dimensions {
                return Err(MetanoiaError::Validation(format!(
                    "embedding dimension mismatch: expected {}, got {}",
                    self.dimensions,
                    entry.embedding.len()
                )));
            }
        }

        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingService for RemoteEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text]).await?;
        vectors
            .pop()
            .ok_or_else(|| MetanoiaError::Embedding("empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut result = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(MAX_BATCH_SIZE) {
            let owned: Vec<String> = chunk.iter().map(|t| t.to_string()).collect();
            debug!("Requesting {} embeddings", owned.len());
            let response = self.call_api_with_retry(&owned).await?;
            result.extend(self.decode(response.data, owned.len())?);
        }
        Ok(result)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_api_key_rejected() {
        let result = RemoteEmbeddingService::new(String::new(), None, None);
        assert!(matches!(result, Err(MetanoiaError::Validation(_))));
    }

    #[test]
    fn test_defaults() {
        let service =
            RemoteEmbeddingService::new("key".to_string(), None, None).unwrap();
        assert_eq!(service.dimensions(), DEFAULT_EMBEDDING_DIM);
        assert_eq!(service.model, "voyage-3-large");
    }

    #[test]
    fn test_decode_rejects_dimension_mismatch() {
        let service = RemoteEmbeddingService::new("key".to_string(), None, None).unwrap();
        let data = vec![EmbeddingData {
            embedding: vec![0.1, 0.2],
            index: 0,
        }];
        let result = service.decode(data, 1);
        assert!(matches!(result, Err(MetanoiaError::Validation(_))));
    }

    #[test]
    fn test_decode_rejects_count_mismatch() {
        let service = RemoteEmbeddingService::new("key".to_string(), None, None).unwrap();
        let result = service.decode(Vec::new(), 2);
        assert!(matches!(result, Err(MetanoiaError::Embedding(_))));
    }

    #[test]
    fn test_decode_restores_input_order() {
        let service = RemoteEmbeddingService::new("key".to_string(), None, None).unwrap();
        let make = |fill: f32| {
            let mut v = vec![0.0; DEFAULT_EMBEDDING_DIM];
            v[0] = fill;
            v
        };
        let data = vec![
            EmbeddingData {
                embedding: make(2.0),
                index: 1,
            },
            EmbeddingData {
                embedding: make(1.0),
                index: 0,
            },
        ];
        let decoded = service.decode(data, 2).unwrap();
        assert_eq!(decoded[0][0], 1.0);
        assert_eq!(decoded[1][0], 2.0);
    }
}
