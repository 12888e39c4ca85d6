//! Query expansion layer
//!
//! Runs only when the earlier layers produced fewer than `min_candidates`
//! distinct chunks. Appends synonyms and related terms to the query,
//! re-embeds it and runs the vector search again.

use super::{Layer, LayerContext, LayerState, RecallRequest, VectorLayer};
use async_trait::async_trait;
use prism_common::errors::Result;
use prism_common::models::{Candidate, RecallLayer};
use prism_common::store::SearchFilter;
use prism_common::text::tokenize;
use std::collections::HashMap;

/// Synonym dictionary for expansion
#[derive(Debug, Clone)]
pub struct SynonymDictionary {
    synonyms: HashMap<String, Vec<String>>,
}

impl Default for SynonymDictionary {
    fn default() -> Self {
        let mut dictionary = Self {
            synonyms: HashMap::new(),
        };

        // Finance and reporting terms
        dictionary.insert("revenue", &["sales", "income", "turnover"]);
        dictionary.insert("profit", &["earnings", "income", "margin"]);
        dictionary.insert("earnings", &["profit", "income"]);
        dictionary.insert("cost", &["expense", "expenditure", "spending"]);
        dictionary.insert("growth", &["increase", "rise"]);
        dictionary.insert("decline", &["decrease", "drop", "fall"]);
        dictionary.insert("employees", &["staff", "headcount", "workforce"]);
        dictionary.insert("assets", &["holdings", "resources"]);

        // Visual and tabular terms
        dictionary.insert("chart", &["graph", "figure", "plot"]);
        dictionary.insert("graph", &["chart", "figure", "plot"]);
        dictionary.insert("figure", &["chart", "image", "diagram"]);
        dictionary.insert("picture", &["image", "photo"]);
        dictionary.insert("table", &["tabular", "data"]);
        dictionary.insert("trend", &["change", "trajectory"]);

        // Chinese terms
        dictionary.insert("收入", &["营收", "营业收入", "销售额"]);
        dictionary.insert("利润", &["净利润", "盈利", "收益"]);
        dictionary.insert("成本", &["费用", "支出"]);
        dictionary.insert("增长", &["上升", "提高"]);
        dictionary.insert("图表", &["图片", "示意图"]);
        dictionary.insert("表格", &["数据表", "统计表"]);

        dictionary
    }
}

impl SynonymDictionary {
    pub fn insert(&mut self, term: &str, related: &[&str]) {
        self.synonyms
            .insert(term.to_lowercase(), related.iter().map(|s| s.to_string()).collect());
    }

    /// Related terms for the query, in query order, without repeats
    pub fn expand(&self, text: &str, max_expansions: usize) -> Vec<String> {
        let tokens = tokenize(text);
        let mut expansions: Vec<String> = Vec::new();

        for token in &tokens {
            let Some(related) = self.synonyms.get(token) else {
                continue;
            };
            for term in related {
                if !tokens.contains(term) && !expansions.contains(term) {
                    expansions.push(term.clone());
                }
            }
        }

        expansions.truncate(max_expansions);
        expansions
    }
}

pub struct ExpansionLayer {
    dictionary: SynonymDictionary,
}

impl ExpansionLayer {
    pub fn new(dictionary: SynonymDictionary) -> Self {
        Self { dictionary }
    }
}

#[async_trait]
impl Layer for ExpansionLayer {
    fn kind(&self) -> RecallLayer {
        RecallLayer::QueryExpansion
    }

    async fn recall(
        &self,
        ctx: &LayerContext,
        request: &RecallRequest,
        state: &LayerState,
    ) -> Result<Vec<Candidate>> {
        let config = &ctx.config;
        if state.distinct() >= config.min_candidates {
            return Ok(Vec::new());
        }

        let expansions = self.dictionary.expand(&request.text, config.max_expansions);
        if expansions.is_empty() {
            return Ok(Vec::new());
        }

        let expanded = format!("{} {}", request.text, expansions.join(" "));
        tracing::debug!(
            modality = %ctx.modality,
            distinct = state.distinct(),
            expansions = ?expansions,
            "Expanding under-producing query"
        );

        let embedding = ctx.embedder.embed(&expanded).await?;
        let filter = SearchFilter {
            min_similarity: Some(config.min_similarity),
            exclude_ids: state.seen_ids().clone(),
            ..Default::default()
        };
        let hits = VectorLayer::widening_search(ctx, &embedding, &filter, config.max_per_layer).await?;

        Ok(hits
            .hits
            .into_iter()
            .map(|hit| Candidate::new(hit.chunk, self.kind(), ctx.modality, hit.similarity))
            .collect())
    }
}
