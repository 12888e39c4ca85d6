//! Structural exact-match layer

use super::{Layer, LayerContext, LayerState, RecallRequest};
use async_trait::async_trait;
use prism_common::errors::Result;
use prism_common::models::{Candidate, RecallLayer};

/// Looks up the exact figure/table number named in the query.
///
/// Only identifiers of the engine's own kind are considered, and the store
/// index matches whole numbers, so "figure 4" never returns "figure 41".
pub struct StructuralLayer;

#[async_trait]
impl Layer for StructuralLayer {
    fn kind(&self) -> RecallLayer {
        RecallLayer::StructuralExact
    }

    async fn recall(
        &self,
        ctx: &LayerContext,
        request: &RecallRequest,
        _state: &LayerState,
    ) -> Result<Vec<Candidate>> {
        let Some(reference) = request.reference.as_ref() else {
            return Ok(Vec::new());
        };
        if ctx.profile.reference_kind != Some(reference.kind) {
            return Ok(Vec::new());
        }

        let found = ctx.store.get_by_structural_id(ctx.modality, reference).await?;
        Ok(found
            .into_iter()
            .map(|chunk| {
                Candidate::new(chunk, self.kind(), ctx.modality, ctx.config.structural_score)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::ModalityProfile;
    use super::*;
    use prism_common::config::EngineConfig;
    use prism_common::models::Modality;
    use std::sync::Arc;

    fn ctx(modality: Modality) -> LayerContext {
        let config = EngineConfig::default();
        LayerContext {
            modality,
            store: Arc::new(store(vec![
                image_chunk("fig41", "Figure 41: Cash Flow", "cash"),
                image_chunk("fig14", "Figure 14", "staff"),
                image_chunk("fig4", "Figure 4: Net Profit Overview", "profit"),
                table_chunk("tab4", "Table 4: Revenue", &["Year", "Revenue"], "2023 10B"),
            ])),
            embedder: Arc::new(embedder()),
            profile: ModalityProfile::new(modality, config.field_weights),
            config: Arc::new(config),
        }
    }

    async fn recall(modality: Modality, text: &str) -> Vec<String> {
        let request = RecallRequest::new(text, vec![0.0; DIM]);
        StructuralLayer
            .recall(&ctx(modality), &request, &LayerState::default())
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_exact_number_only() {
        assert_eq!(recall(Modality::Image, "show figure 4").await, vec!["fig4"]);
        assert_eq!(recall(Modality::Image, "what is in figure 41?").await, vec!["fig41"]);
        assert!(recall(Modality::Image, "figure 1").await.is_empty());
    }

    #[tokio::test]
    async fn test_kind_must_match_engine() {
        assert!(recall(Modality::Image, "table 4").await.is_empty());
        assert_eq!(recall(Modality::Table, "table 4").await, vec!["tab4"]);
        assert!(recall(Modality::Text, "figure 4").await.is_empty());
    }

    #[tokio::test]
    async fn test_fixed_high_score() {
        let request = RecallRequest::new("figure 4", vec![0.0; DIM]);
        let out = StructuralLayer
            .recall(&ctx(Modality::Image), &request, &LayerState::default())
            .await
            .unwrap();
        assert_eq!(out[0].recall_score, EngineConfig::default().structural_score);
    }
}
