//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and the OpenAI implementation,
//! plus the batch retry loop and vector helpers shared by the index builder
//! and the query path.
//!
//! # Retry Strategy
//!
//! A provider makes one attempt per call and classifies its failure:
//! - HTTP 429 (rate limited) and 5xx (server error) → retryable
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retryable
//!
//! [`embed_with_retry`] retries retryable failures with exponential backoff:
//! `base, 2·base, 4·base, …` with the exponent capped at 5.

use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::error::{KnowledgeError, Result};

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// A service that turns texts into fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Embed a batch in one attempt. Returns one vector per input, in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a batch, retrying retryable failures with exponential backoff.
///
/// Also checks the response shape: a wrong vector count is a
/// non-retryable failure of the whole batch.
pub async fn embed_with_retry(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    max_retries: u32,
    base_delay: Duration,
) -> Result<Vec<Vec<f32>>> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = base_delay * (1u32 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        match provider.embed(texts).await {
            Ok(vectors) => {
                if vectors.len() != texts.len() {
                    return Err(KnowledgeError::external(
                        "embedding",
                        format!(
                            "expected {} vectors, service returned {}",
                            texts.len(),
                            vectors.len()
                        ),
                        false,
                    ));
                }
                return Ok(vectors);
            }
            Err(e) if e.is_retryable() && attempt < max_retries => {
                warn!(attempt = attempt + 1, error = %e, "embedding batch failed, retrying");
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        KnowledgeError::external("embedding", "embedding failed after retries", false)
    }))
}

/// Embed a single query text.
pub async fn embed_query(
    provider: &dyn EmbeddingProvider,
    config: &EmbeddingConfig,
    text: &str,
) -> Result<Vec<f32>> {
    let results = embed_with_retry(
        provider,
        &[text.to_string()],
        config.max_retries,
        Duration::from_millis(config.retry_base_delay_ms),
    )
    .await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| KnowledgeError::external("embedding", "empty embedding response", false))
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls `POST /v1/embeddings` with the configured model. The API key is
/// handed over explicitly by the caller.
pub struct OpenAIProvider {
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIProvider {
    /// # Errors
    ///
    /// Returns a validation error when the key is missing.
    pub fn new(config: &EmbeddingConfig, api_key: Option<&str>) -> Result<Self> {
        let api_key = api_key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| KnowledgeError::Validation("OpenAI API key is required".into()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| KnowledgeError::external("openai", e.to_string(), false))?;

        Ok(Self {
            model: config.model.clone(),
            api_key: api_key.to_string(),
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(OPENAI_EMBEDDINGS_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| KnowledgeError::external("openai", e.to_string(), true))?;

        let status = response.status();
        if status.is_success() {
            let json: serde_json::Value = response
                .json()
                .await
                .map_err(|e| KnowledgeError::external("openai", e.to_string(), true))?;
            return parse_openai_response(&json);
        }

        let retryable = status.as_u16() == 429 || status.is_server_error();
        let body_text = response.text().await.unwrap_or_default();
        Err(KnowledgeError::external(
            "openai",
            format!("OpenAI API error {}: {}", status, body_text),
            retryable,
        ))
    }
}

/// Parse the OpenAI embeddings API response JSON.
///
/// Orders vectors by the `index` field so they line up with the input.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let invalid = |what: &str| {
        KnowledgeError::external("openai", format!("invalid response: {}", what), false)
    };

    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| invalid("missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| invalid("missing embedding"))?;
        let vec = embedding
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| invalid("non-numeric embedding value"))?;
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Create the configured [`EmbeddingProvider`].
pub fn create_provider(
    config: &EmbeddingConfig,
    api_key: Option<&str>,
) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAIProvider::new(config, api_key)?)),
        other => Err(KnowledgeError::Config(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

// ============ Vector utilities ============

/// Encode a float vector as little-endian f32 bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes. Reverses [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
