//! Query and chunk embedders
//!
//! `OpenAiEmbedder` calls an OpenAI-compatible `/embeddings` endpoint.
//! `HashingEmbedder` is deterministic and offline, for tests and local runs.

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use crate::metrics::record_embedding;
use crate::text::tokenize;
use async_trait::async_trait;
use backoff::future::retry;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Maps text into the vector space shared by the content store
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// One vector per input, in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    fn model_name(&self) -> &str;

    /// Length of every vector this embedder returns
    fn dimension(&self) -> usize;
}

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// OpenAI-compatible embedding client
///
/// Failed requests are retried with exponential backoff; client errors
/// other than 429 are not retried.
pub struct OpenAiEmbedder {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimension: usize,
    attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

#[derive(Serialize)]
struct EmbedBody<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedReply {
    data: Vec<EmbedVector>,
}

#[derive(Deserialize)]
struct EmbedVector {
    embedding: Vec<f32>,
}

/// One failed request and whether another attempt could succeed
struct Failure {
    error: AppError,
    retryable: bool,
}

impl Failure {
    fn retryable(message: String) -> Self {
        Self {
            error: AppError::EmbeddingError { message },
            retryable: true,
        }
    }
}

/// Run `op` until it succeeds, fails permanently or uses up `attempts`
async fn retry_request<T, F, Fut>(policy: ExponentialBackoff, attempts: u32, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, Failure>>,
{
    let mut attempt = 0;
    retry(policy, || {
        attempt += 1;
        let current = attempt;
        let call = op(current);
        async move {
            call.await.map_err(|failure| {
                if failure.retryable && current < attempts {
                    tracing::warn!(attempt = current, error = %failure.error, "Embedding request failed, retrying");
                    backoff::Error::transient(failure.error)
                } else {
                    backoff::Error::permanent(failure.error)
                }
            })
        }
    })
    .await
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
            message: "embedding.api_key is required for the openai provider".to_string(),
        })?;
        let base = config.api_base.as_deref().unwrap_or("https://api.openai.com/v1");

        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
            endpoint: format!("{}/embeddings", base.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            dimension: config.dimension,
            attempts: config.max_retries.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        })
    }

    fn policy(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_max_interval(self.max_backoff)
            .with_max_elapsed_time(None)
            .build()
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        retry_request(self.policy(), self.attempts, |_| async move {
            let start = Instant::now();
            let outcome = self.send(texts).await;
            record_embedding(start.elapsed().as_secs_f64(), &self.model, outcome.is_ok());
            outcome
        })
        .await
    }

    async fn send(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, Failure> {
        let body = EmbedBody {
            model: &self.model,
            input: texts,
        };
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Failure::retryable(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Failure {
                error: AppError::EmbeddingError {
                    message: format!("embedding API returned {status}: {detail}"),
                },
                retryable: status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS,
            });
        }

        let reply: EmbedReply = response
            .json()
            .await
            .map_err(|e| Failure::retryable(format!("malformed embedding response: {e}")))?;
        if reply.data.len() != texts.len() {
            return Err(Failure {
                error: AppError::EmbeddingError {
                    message: format!("expected {} embeddings, got {}", texts.len(), reply.data.len()),
                },
                retryable: false,
            });
        }
        Ok(reply.data.into_iter().map(|v| v.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let input = [text.to_string()];
        let mut vectors = self.request(&input).await?;
        vectors.pop().ok_or_else(|| AppError::EmbeddingError {
            message: "empty embedding response".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        const BATCH_SIZE: usize = 100;

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(BATCH_SIZE) {
            vectors.extend(self.request(batch).await?);
        }
        Ok(vectors)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic bag-of-tokens embedder
///
/// Each token is hashed into one signed bucket and the result is
/// L2-normalized, so texts sharing vocabulary have positive cosine
/// similarity. Chunks and queries embedded with the same dimension are
/// directly comparable.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Synchronous embedding, used when loading fixtures
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let index = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn model_name(&self) -> &str {
        "feature-hashing"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "hashing" => Ok(Arc::new(HashingEmbedder::new(config.dimension))),
        other => {
            tracing::warn!(provider = other, "Unknown embedding provider, using feature hashing");
            Ok(Arc::new(HashingEmbedder::new(config.dimension)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hashing_embedder_dimension() {
        let embedder = HashingEmbedder::new(64);
        let embedding = embedder.embed("net profit overview").await.unwrap();
        assert_eq!(embedding.len(), 64);
        let norm: f32 = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::new(128);
        let a = embedder.embed("company revenue").await.unwrap();
        let b = embedder.embed("company revenue").await.unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_shared_vocabulary_is_similar() {
        let embedder = HashingEmbedder::new(256);
        let query = embedder.embed_sync("net profit");
        let related = embedder.embed_sync("Figure 4: Net Profit Overview");
        let unrelated = embedder.embed_sync("employee headcount by region");
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn test_cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_batch_uses_single_embed() {
        let embedder = HashingEmbedder::new(32);
        let texts = vec!["net profit".to_string(), "图4 营收".to_string()];
        let embeddings = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0], embedder.embed_sync("net profit"));
    }

    fn quick_policy() -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(1))
            .with_max_interval(Duration::from_millis(2))
            .with_max_elapsed_time(None)
            .build()
    }

    #[tokio::test]
    async fn test_retry_stops_after_attempts() {
        let calls = std::sync::atomic::AtomicU32::new(0);
        let outcome: Result<()> = retry_request(quick_policy(), 3, |_| {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err(Failure::retryable("connection reset".into())) }
        })
        .await;
        assert!(matches!(outcome, Err(AppError::EmbeddingError { .. })));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let outcome = retry_request(quick_policy(), 3, |attempt| async move {
            if attempt < 2 {
                Err(Failure::retryable("503".into()))
            } else {
                Ok(attempt)
            }
        })
        .await;
        assert_eq!(outcome.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let calls = std::sync::atomic::AtomicU32::new(0);
        let outcome: Result<()> = retry_request(quick_policy(), 5, |_| {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async {
                Err(Failure {
                    error: AppError::EmbeddingError {
                        message: "401".into(),
                    },
                    retryable: false,
                })
            }
        })
        .await;
        assert!(outcome.is_err());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_openai_requires_key() {
        let config = EmbeddingConfig {
            provider: "openai".into(),
            ..Default::default()
        };
        assert!(matches!(create_embedder(&config), Err(AppError::Configuration { .. })));
    }
}
