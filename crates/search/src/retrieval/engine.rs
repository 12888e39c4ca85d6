//! Layered recall engine

use super::{
    cap_output, EngineOutput, ExpansionLayer, FuzzyLayer, HybridLayer, KeywordLayer, Layer,
    LayerContext, LayerState, ModalityProfile, RecallRequest, StructuralLayer, SynonymDictionary,
    VectorLayer,
};
use prism_common::config::EngineConfig;
use prism_common::errors::{AppError, Result};
use prism_common::metrics::record_layer_error;
use prism_common::models::{EngineReport, LayerReport, Modality, RecallLayer};
use prism_common::store::ContentStore;
use prism_common::Embedder;
use std::sync::Arc;
use std::time::Instant;

/// Runs the enabled layers of one modality in priority order
pub struct LayeredEngine {
    ctx: LayerContext,
    layers: Vec<Box<dyn Layer>>,
}

impl LayeredEngine {
    pub fn new(
        modality: Modality,
        store: Arc<dyn ContentStore>,
        embedder: Arc<dyn Embedder>,
        config: EngineConfig,
    ) -> Self {
        let toggles = config.layers;
        let mut layers: Vec<Box<dyn Layer>> = Vec::new();
        if toggles.structural {
            layers.push(Box::new(StructuralLayer));
        }
        if toggles.vector {
            layers.push(Box::new(VectorLayer));
        }
        if toggles.keyword {
            layers.push(Box::new(KeywordLayer));
        }
        if toggles.hybrid {
            layers.push(Box::new(HybridLayer));
        }
        if toggles.fuzzy {
            layers.push(Box::new(FuzzyLayer));
        }
        if toggles.expansion {
            layers.push(Box::new(ExpansionLayer::new(SynonymDictionary::default())));
        }

        let ctx = LayerContext {
            modality,
            store,
            embedder,
            profile: ModalityProfile::new(modality, config.field_weights),
            config: Arc::new(config),
        };
        Self::with_layers(ctx, layers)
    }

    pub(crate) fn with_layers(ctx: LayerContext, layers: Vec<Box<dyn Layer>>) -> Self {
        Self { ctx, layers }
    }

    pub fn modality(&self) -> Modality {
        self.ctx.modality
    }

    pub async fn run(&self, request: &RecallRequest) -> Result<EngineOutput> {
        let start = Instant::now();
        let modality = self.ctx.modality;
        let mut state = LayerState::default();
        let mut report = EngineReport::empty(modality);

        for layer in &self.layers {
            let kind = layer.kind();
            let layer_start = Instant::now();

            match layer.recall(&self.ctx, request, &state).await {
                Ok(candidates) => {
                    let candidates = cap_output(candidates, self.ctx.config.max_per_layer);
                    let duration_ms = layer_start.elapsed().as_secs_f64() * 1000.0;
                    tracing::debug!(
                        modality = %modality,
                        layer = %kind,
                        candidates = candidates.len(),
                        elapsed_ms = duration_ms,
                        "Recall layer finished"
                    );
                    report.layers.push(LayerReport {
                        layer: kind,
                        candidates: candidates.len(),
                        duration_ms,
                        error: None,
                    });

                    let short_circuit = kind == RecallLayer::StructuralExact && !candidates.is_empty();
                    state.record(kind, candidates);
                    if short_circuit {
                        report.short_circuited = true;
                        break;
                    }
                }
                Err(err @ AppError::ContentStoreUnavailable { .. }) => {
                    tracing::error!(
                        modality = %modality,
                        layer = %kind,
                        error = %err,
                        "Content store unreachable, aborting engine"
                    );
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(
                        modality = %modality,
                        layer = %kind,
                        error = %err,
                        "Recall layer failed, skipping"
                    );
                    record_layer_error(modality.as_str(), kind.as_str());
                    report.layers.push(LayerReport {
                        layer: kind,
                        candidates: 0,
                        duration_ms: layer_start.elapsed().as_secs_f64() * 1000.0,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        let candidates = state.into_candidates();
        report.candidates = candidates.len();
        report.duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        Ok(EngineOutput { candidates, report })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use async_trait::async_trait;
    use prism_common::models::{Candidate, Chunk};
    use prism_common::reference::StructuralRef;
    use prism_common::store::{SearchFilter, SearchHits};

    struct FailingLayer;

    #[async_trait]
    impl Layer for FailingLayer {
        fn kind(&self) -> RecallLayer {
            RecallLayer::Keyword
        }

        async fn recall(&self, _: &LayerContext, _: &RecallRequest, _: &LayerState) -> Result<Vec<Candidate>> {
            Err(AppError::RecallLayer {
                layer: "keyword".into(),
                message: "tokenizer exploded".into(),
            })
        }
    }

    struct UnreachableStore;

    #[async_trait]
    impl ContentStore for UnreachableStore {
        async fn search(&self, _: Modality, _: &[f32], _: &SearchFilter, _: usize) -> Result<SearchHits> {
            Err(AppError::ContentStoreUnavailable { message: "connection refused".into() })
        }

        async fn get_by_structural_id(&self, _: Modality, _: &StructuralRef) -> Result<Option<Arc<Chunk>>> {
            Err(AppError::ContentStoreUnavailable { message: "connection refused".into() })
        }

        async fn scan(&self, _: Modality) -> Result<Vec<Arc<Chunk>>> {
            Err(AppError::ContentStoreUnavailable { message: "connection refused".into() })
        }

        async fn health_check(&self) -> Result<()> {
            Err(AppError::ContentStoreUnavailable { message: "connection refused".into() })
        }
    }

    fn ctx(modality: Modality, store: Arc<dyn ContentStore>) -> LayerContext {
        let config = EngineConfig::default();
        LayerContext {
            modality,
            store,
            embedder: Arc::new(embedder()),
            profile: ModalityProfile::new(modality, config.field_weights),
            config: Arc::new(config),
        }
    }

    fn image_store() -> Arc<dyn ContentStore> {
        Arc::new(store(vec![
            image_chunk("fig4", "Figure 4: Net Profit Overview", "Bar chart of net profit by quarter"),
            image_chunk("fig41", "Figure 41: Cash Flow", "Line chart of cash flow"),
            image_chunk("fig14", "Figure 14: Headcount", "Employees by region"),
        ]))
    }

    #[tokio::test]
    async fn test_structural_hit_short_circuits() {
        let store = image_store();
        let engine = LayeredEngine::new(Modality::Image, store, Arc::new(embedder()), EngineConfig::default());
        let request = RecallRequest::new("show figure 4", embedder().embed_sync("show figure 4"));

        let output = engine.run(&request).await.unwrap();
        assert_eq!(output.candidates.len(), 1);
        assert_eq!(output.candidates[0].id(), "fig4");
        assert_eq!(output.candidates[0].recall_layer, RecallLayer::StructuralExact);
        assert!(output.report.short_circuited);
        assert_eq!(output.report.layers.len(), 1);
    }

    #[tokio::test]
    async fn test_failing_layer_is_skipped() {
        let engine = LayeredEngine::with_layers(
            ctx(Modality::Image, image_store()),
            vec![Box::new(FailingLayer), Box::new(VectorLayer)],
        );
        let request = RecallRequest::new("net profit", embedder().embed_sync("net profit"));

        let output = engine.run(&request).await.unwrap();
        assert!(output.report.layers[0].error.is_some());
        assert!(output.report.layers[1].error.is_none());
        assert!(!output.candidates.is_empty());
        assert!(output.candidates.iter().all(|c| c.recall_layer == RecallLayer::VectorSimilarity));
    }

    #[tokio::test]
    async fn test_unreachable_store_aborts_engine() {
        let engine = LayeredEngine::new(
            Modality::Text,
            Arc::new(UnreachableStore),
            Arc::new(embedder()),
            EngineConfig::default(),
        );
        let request = RecallRequest::new("revenue", embedder().embed_sync("revenue"));
        let err = engine.run(&request).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_disabled_layers_do_not_run() {
        let mut config = EngineConfig::default();
        config.layers.structural = false;
        config.layers.vector = false;
        config.layers.hybrid = false;
        config.layers.expansion = false;
        let engine = LayeredEngine::new(Modality::Image, image_store(), Arc::new(embedder()), config);
        let request = RecallRequest::new("show figure 4", embedder().embed_sync("show figure 4"));

        let output = engine.run(&request).await.unwrap();
        let ran: Vec<RecallLayer> = output.report.layers.iter().map(|l| l.layer).collect();
        assert_eq!(ran, vec![RecallLayer::Keyword, RecallLayer::Fuzzy]);
        assert!(!output.report.short_circuited);
    }

    #[tokio::test]
    async fn test_candidates_are_tagged_with_source() {
        let store: Arc<dyn ContentStore> = Arc::new(store(vec![
            text_chunk("t1", "Company X revenue grew to $10B in 2023"),
            text_chunk("t2", "Company Y opened a new office"),
        ]));
        let engine = LayeredEngine::new(Modality::Text, store, Arc::new(embedder()), EngineConfig::default());
        let request = RecallRequest::new("Company X revenue", embedder().embed_sync("Company X revenue"));

        let output = engine.run(&request).await.unwrap();
        assert!(!output.candidates.is_empty());
        assert!(output.candidates.iter().all(|c| c.source == Modality::Text));
        assert!(output.candidates.iter().any(|c| c.recall_layer == RecallLayer::Keyword));
    }
}
