//! Relevance models used by the reranking service

use async_trait::async_trait;
use prism_common::config::RerankConfig;
use prism_common::errors::{AppError, Result};
use prism_common::text::token_set;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Cross-encoder style relevance scoring
#[async_trait]
pub trait RelevanceModel: Send + Sync {
    /// One score per document, in input order
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Rule-based lexical score: term coverage plus an exact-phrase bonus
pub fn rule_score(query_tokens: &HashSet<String>, query_lower: &str, document: &str) -> f32 {
    let doc_tokens = token_set(document);
    let coverage = prism_common::text::overlap_ratio(query_tokens, &doc_tokens);
    let phrase = if !query_lower.is_empty() && document.to_lowercase().contains(query_lower) {
        1.0
    } else {
        0.0
    };
    0.7 * coverage + 0.3 * phrase
}

/// Local relevance model over token sets, used when no rerank API is configured
#[derive(Debug, Default)]
pub struct LexicalRelevanceModel;

#[async_trait]
impl RelevanceModel for LexicalRelevanceModel {
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        let query_tokens = token_set(query);
        Ok(documents
            .iter()
            .map(|doc| {
                let doc_tokens = token_set(doc);
                let denom = ((query_tokens.len() * doc_tokens.len()) as f32).sqrt();
                if denom == 0.0 {
                    0.0
                } else {
                    query_tokens.intersection(&doc_tokens).count() as f32 / denom
                }
            })
            .collect())
    }

    fn model_name(&self) -> &str {
        "lexical"
    }
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f32,
}

/// Rerank API client (`{index, relevance_score}` results)
pub struct HttpRelevanceModel {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl HttpRelevanceModel {
    pub fn new(config: &RerankConfig) -> Result<Self> {
        let endpoint = config.endpoint.clone().ok_or_else(|| AppError::Configuration {
            message: "rerank.endpoint is required for the HTTP relevance model".to_string(),
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

fn scores_in_order(results: Vec<RerankResult>, count: usize) -> Result<Vec<f32>> {
    let mut scores = vec![0.0; count];
    for result in results {
        let slot = scores.get_mut(result.index).ok_or_else(|| AppError::Reranker {
            message: format!("result index {} out of range for {} documents", result.index, count),
        })?;
        *slot = result.relevance_score;
    }
    Ok(scores)
}

#[async_trait]
impl RelevanceModel for HttpRelevanceModel {
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        let request = RerankRequest {
            model: &self.model,
            query,
            documents,
            top_n: documents.len(),
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| AppError::Reranker {
            message: format!("Rerank request failed: {}", e),
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Reranker {
                message: format!("Rerank API error {}: {}", status, body),
            });
        }

        let parsed: RerankResponse = response.json().await.map_err(|e| AppError::Reranker {
            message: format!("Failed to parse rerank response: {}", e),
        })?;

        scores_in_order(parsed.results, documents.len())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
