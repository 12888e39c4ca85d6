//! Query router
//!
//! Decides which modality engines a query is dispatched to. Unknown or
//! unmatched terms never raise; the router always returns at least the
//! text engine.

use async_trait::async_trait;
use prism_common::config::RouterConfig;
use prism_common::models::{Modality, Query};
use prism_common::reference::{RefKind, StructuralRef};
use prism_common::text::{contains_cjk, tokenize};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Rewrites pronouns and implicit references using session history
#[async_trait]
pub trait ReferenceResolver: Send + Sync {
    async fn resolve_references(&self, session_id: &str, text: &str) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteReason {
    /// The caller named the modality
    Explicit,
    /// The query carries a numbered figure/table identifier
    StructuralReference,
    /// One modality's indicative terms outnumbered the other's
    TermMatch,
    /// No clear signal; the hybrid default was used
    Tie,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    pub modalities: BTreeSet<Modality>,
    pub resolved_text: String,
    pub confidence: f32,
    pub reason: RouteReason,
    pub image_score: f32,
    pub table_score: f32,
}

/// Query router
pub struct QueryRouter {
    config: RouterConfig,
    enabled: BTreeSet<Modality>,
}

impl QueryRouter {
    /// Create a router that only dispatches to `enabled` engines
    pub fn new(config: RouterConfig, enabled: impl IntoIterator<Item = Modality>) -> Self {
        Self {
            config,
            enabled: enabled.into_iter().collect(),
        }
    }

    /// Resolve references (when a session is present) and classify
    pub async fn route(&self, query: &Query, resolver: Option<&dyn ReferenceResolver>) -> RouteDecision {
        let resolved_text = match (query.session_id.as_deref(), resolver) {
            (Some(session_id), Some(resolver)) => resolver.resolve_references(session_id, &query.text).await,
            _ => query.text.clone(),
        };

        let mut decision = match query.requested_modality.explicit() {
            Some(modalities) => RouteDecision {
                modalities: modalities.into_iter().collect(),
                resolved_text,
                confidence: 1.0,
                reason: RouteReason::Explicit,
                image_score: 0.0,
                table_score: 0.0,
            },
            None => self.classify(resolved_text),
        };

        decision.modalities.retain(|m| self.enabled.contains(m));
        if decision.modalities.is_empty() {
            decision.modalities.insert(Modality::Text);
        }

        tracing::debug!(
            modalities = ?decision.modalities,
            confidence = decision.confidence,
            reason = ?decision.reason,
            "Query routed"
        );
        decision
    }

    fn classify(&self, text: String) -> RouteDecision {
        let (image_score, table_score) = self.term_scores(&text);

        if let Some(reference) = StructuralRef::parse_first(&text) {
            let modality = match reference.kind {
                RefKind::Figure => Modality::Image,
                RefKind::Table => Modality::Table,
            };
            let (image_score, table_score) = match reference.kind {
                RefKind::Figure => (image_score + self.config.reference_weight, table_score),
                RefKind::Table => (image_score, table_score + self.config.reference_weight),
            };
            return RouteDecision {
                modalities: BTreeSet::from([modality]),
                resolved_text: text,
                confidence: 0.95,
                reason: RouteReason::StructuralReference,
                image_score,
                table_score,
            };
        }

        let margin = (image_score - table_score).abs();
        let (modalities, confidence, reason) = if margin == 0.0 {
            (BTreeSet::from([Modality::Text, Modality::Table]), 0.5, RouteReason::Tie)
        } else {
            let winner = if image_score > table_score { Modality::Image } else { Modality::Table };
            (BTreeSet::from([winner]), (0.6 + 0.1 * margin).min(0.95), RouteReason::TermMatch)
        };

        RouteDecision {
            modalities,
            resolved_text: text,
            confidence,
            reason,
            image_score,
            table_score,
        }
    }

    /// Count matching indicative terms for each modality
    fn term_scores(&self, text: &str) -> (f32, f32) {
        let mut tokens: HashSet<String> = HashSet::new();
        for token in tokenize(text) {
            if let Some(stem) = token.strip_suffix('s').filter(|s| s.len() > 2) {
                tokens.insert(stem.to_string());
            }
            tokens.insert(token);
        }

        let count = |terms: &[String]| {
            terms
                .iter()
                .filter(|term| {
                    if contains_cjk(term) {
                        text.contains(term.as_str())
                    } else {
                        tokens.contains(&term.to_lowercase())
                    }
                })
                .count() as f32
        };

        (count(self.config.image_terms.as_slice()), count(self.config.table_terms.as_slice()))
    }
}
