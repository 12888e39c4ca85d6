//! Query orchestration
//!
//! `validate -> route -> embed -> recall (parallel) -> fuse -> rerank ->
//! smart filter -> synthesize -> remember`. Recoverable failures are absorbed where they
//! happen and listed in `metrics.degraded`; only user-input errors,
//! cancellation and fatal failures (content store or embedder unreachable)
//! produce `success = false`.

use crate::filter::SmartFilter;
use crate::memory::ConversationalMemory;
use crate::synthesis::Synthesizer;
use futures::future::join_all;
use prism_common::config::AppConfig;
use prism_common::embeddings::create_embedder;
use prism_common::errors::{AppError, ErrorDetails, Result};
use prism_common::llm::ChatCompletionModel;
use prism_common::metrics::{record_engine, record_stage, register_metrics, QueryTimer};
use prism_common::models::{
    Candidate, EngineReport, Modality, PipelineMetrics, PipelineResult, Query, SourceRef, Stage,
};
use prism_common::store::ContentStore;
use prism_common::{CancellationToken, Embedder, LanguageModel};
use prism_search::{
    Fusion, ModalityEngine, QueryRouter, RecallEngine, RecallRequest, ReferenceResolver, RerankingService,
    RouteDecision,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

/// End-to-end retrieval and synthesis pipeline
pub struct RetrievalPipeline {
    config: Arc<AppConfig>,
    router: QueryRouter,
    engines: Vec<ModalityEngine>,
    embedder: Arc<dyn Embedder>,
    fusion: Fusion,
    reranker: RerankingService,
    smart_filter: SmartFilter,
    synthesizer: Synthesizer,
    memory: Arc<ConversationalMemory>,
}

impl RetrievalPipeline {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn ContentStore>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LanguageModel>,
    ) -> Result<Self> {
        register_metrics();
        let recall = &config.recall;
        let engines: Vec<ModalityEngine> = Modality::ALL
            .into_iter()
            .filter_map(|modality| {
                let engine_config = match modality {
                    Modality::Text => &recall.text,
                    Modality::Image => &recall.image,
                    Modality::Table => &recall.table,
                };
                engine_config.enabled.then(|| {
                    ModalityEngine::new(modality, store.clone(), embedder.clone(), engine_config.clone())
                })
            })
            .collect();

        let router = QueryRouter::new(config.router.clone(), engines.iter().map(|e| e.modality()));
        let reranker = RerankingService::from_config(config.rerank.clone())?;
        let smart_filter = SmartFilter::new(config.filter.clone());
        let synthesizer = Synthesizer::new(config.synthesis.clone(), llm);
        let memory = Arc::new(ConversationalMemory::new(config.memory.clone()));

        tracing::info!(
            engines = ?engines.iter().map(|e| e.modality()).collect::<Vec<_>>(),
            embedder = embedder.model_name(),
            "Retrieval pipeline initialized"
        );

        Ok(Self {
            fusion: Fusion::new(config.fusion.clone()),
            config: Arc::new(config),
            router,
            engines,
            embedder,
            reranker,
            smart_filter,
            synthesizer,
            memory,
        })
    }

    /// Build every collaborator from configuration
    pub fn from_config(config: AppConfig, store: Arc<dyn ContentStore>) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let llm: Arc<dyn LanguageModel> = Arc::new(ChatCompletionModel::new(config.llm.clone())?);
        Self::new(config, store, embedder, llm)
    }

    pub fn with_reranker(mut self, reranker: RerankingService) -> Self {
        self.reranker = reranker;
        self
    }

    /// Share a memory between pipelines (or with a background sweeper)
    pub fn with_memory(mut self, memory: Arc<ConversationalMemory>) -> Self {
        self.memory = memory;
        self
    }

    pub fn memory(&self) -> &Arc<ConversationalMemory> {
        &self.memory
    }

    pub async fn process_query(&self, query: Query) -> PipelineResult {
        self.process_query_with_cancel(query, &CancellationToken::new()).await
    }

    /// Process a query; cancelling the token abandons in-flight work and
    /// discards partial results
    pub async fn process_query_with_cancel(&self, query: Query, cancel: &CancellationToken) -> PipelineResult {
        let query_id = Uuid::now_v7();
        let timer = QueryTimer::start();
        let mut metrics = PipelineMetrics::default();

        let outcome = self.run(query_id, &query, cancel, &mut metrics).await;
        let degraded = !metrics.degraded.is_empty();

        match outcome {
            Ok((answer_text, filtered_sources)) => {
                metrics.total_ms = timer.finish(true, degraded) * 1000.0;
                PipelineResult {
                    query_id,
                    answer_text,
                    filtered_sources,
                    metrics,
                    success: true,
                    error: None,
                }
            }
            Err(err) => {
                metrics.total_ms = timer.finish(false, degraded) * 1000.0;
                if err.is_user_input() || matches!(err, AppError::Cancelled) {
                    tracing::info!(query_id = %query_id, error = %err, "Query rejected");
                } else {
                    tracing::error!(query_id = %query_id, error = %err, "Query failed");
                }
                PipelineResult::failed(query_id, ErrorDetails::from(&err), metrics)
            }
        }
    }

    #[instrument(
        skip_all,
        fields(query_id = %query_id, session_id = query.session_id.as_deref().unwrap_or("-"))
    )]
    async fn run(
        &self,
        query_id: Uuid,
        query: &Query,
        cancel: &CancellationToken,
        metrics: &mut PipelineMetrics,
    ) -> Result<(String, Vec<SourceRef>)> {
        let start = Instant::now();
        query.check()?;
        finish_stage(metrics, Stage::Validate, start, 1, 1);

        // Dropped on any early return, which releases the session's write slot
        let ticket = query.session_id.as_deref().map(|id| self.memory.begin_turn(id));

        let start = Instant::now();
        let resolver = ticket.as_ref().map(|_| self.memory.as_ref() as &dyn ReferenceResolver);
        let decision = self.router.route(query, resolver).await;
        finish_stage(metrics, Stage::Route, start, 1, decision.modalities.len());
        ensure_active(cancel)?;

        let start = Instant::now();
        let embedding = self.embed(&decision.resolved_text, cancel).await?;
        finish_stage(metrics, Stage::Embed, start, 1, 1);
        let request = RecallRequest::new(decision.resolved_text.clone(), embedding);

        let start = Instant::now();
        let lists = self.recall(&decision, &request, cancel, metrics).await?;
        let recalled: usize = lists.iter().map(Vec::len).sum();
        finish_stage(metrics, Stage::Recall, start, lists.len(), recalled);

        let start = Instant::now();
        let fused = self.fusion.fuse(lists);
        finish_stage(metrics, Stage::Fusion, start, recalled, fused.len());
        ensure_active(cancel)?;

        let start = Instant::now();
        let fused_count = fused.len();
        let outcome = self.reranker.rerank(&decision.resolved_text, fused).await;
        if let Some(reason) = &outcome.degraded {
            metrics.mark_degraded(Stage::Rerank, reason.clone());
        }
        let reranked: Vec<Candidate> = outcome.candidates;
        let reranked_count = reranked.len();
        finish_stage(metrics, Stage::Rerank, start, fused_count, reranked_count);

        let start = Instant::now();
        let mut ranked = self.smart_filter.filter(reranked);
        ranked.truncate(query.max_results);
        if self.smart_filter.enabled() {
            finish_stage(metrics, Stage::SmartFilter, start, reranked_count, ranked.len());
        }

        let history = query.session_id.as_deref().map(|id| self.memory.context_summary(id));
        let synthesis = self
            .synthesizer
            .synthesize(&decision.resolved_text, &ranked, history.as_ref(), cancel)
            .await?;
        metrics.merge(synthesis.metrics);
        ensure_active(cancel)?;

        if let Some(ticket) = ticket {
            let start = Instant::now();
            self.memory.commit_turn(ticket, &query.text, &synthesis.answer_text).await;
            finish_stage(metrics, Stage::Memory, start, 1, 1);
        }

        tracing::info!(
            candidates = ranked.len(),
            sources = synthesis.sources.len(),
            degraded = metrics.degraded.len(),
            elapsed_ms = metrics.stages.iter().map(|s| s.duration_ms).sum::<f64>(),
            "Query processed"
        );
        Ok((synthesis.answer_text, synthesis.sources))
    }

    async fn embed(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<f32>> {
        let timeout = self.config.embed_timeout();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            outcome = tokio::time::timeout(timeout, self.embedder.embed(text)) => outcome,
        };
        match outcome {
            Ok(Ok(embedding)) => Ok(embedding),
            Ok(Err(err @ (AppError::EmbeddingError { .. } | AppError::EmbeddingTimeout { .. }))) => Err(err),
            Ok(Err(err)) => Err(AppError::EmbeddingError {
                message: err.to_string(),
            }),
            Err(_) => Err(AppError::EmbeddingTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Run the routed engines in parallel, each bounded by the engine timeout.
    /// Fails only when every dispatched engine failed.
    async fn recall(
        &self,
        decision: &RouteDecision,
        request: &RecallRequest,
        cancel: &CancellationToken,
        metrics: &mut PipelineMetrics,
    ) -> Result<Vec<Vec<Candidate>>> {
        let timeout = self.config.engine_timeout();
        let dispatched: Vec<&ModalityEngine> = self
            .engines
            .iter()
            .filter(|engine| decision.modalities.contains(&engine.modality()))
            .collect();

        let runs = dispatched.iter().map(|engine| async move {
            let start = Instant::now();
            let outcome = tokio::time::timeout(timeout, engine.recall(request)).await;
            (engine.modality(), outcome, start.elapsed())
        });
        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            results = join_all(runs) => results,
        };

        let mut lists = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for (modality, outcome, elapsed) in results {
            let mut report = EngineReport::empty(modality);
            report.duration_ms = elapsed.as_secs_f64() * 1000.0;
            match outcome {
                Ok(Ok(output)) => {
                    record_engine(modality.as_str(), elapsed.as_secs_f64(), output.candidates.len(), false);
                    metrics.engines.push(output.report);
                    lists.push(output.candidates);
                }
                Ok(Err(err)) => {
                    tracing::error!(modality = %modality, error = %err, "Recall engine failed");
                    record_engine(modality.as_str(), elapsed.as_secs_f64(), 0, false);
                    metrics.mark_degraded(Stage::Recall, format!("{modality} engine failed: {err}"));
                    report.error = Some(err.to_string());
                    metrics.engines.push(report);
                    failures.push(err);
                }
                Err(_) => {
                    tracing::warn!(
                        modality = %modality,
                        timeout_ms = timeout.as_millis() as u64,
                        "Recall engine timed out, contributing no candidates"
                    );
                    record_engine(modality.as_str(), elapsed.as_secs_f64(), 0, true);
                    metrics.mark_degraded(
                        Stage::Recall,
                        format!("{modality} engine timed out after {}ms", timeout.as_millis()),
                    );
                    report.timed_out = true;
                    metrics.engines.push(report);
                    lists.push(Vec::new());
                }
            }
        }

        if !failures.is_empty() && failures.len() == dispatched.len() {
            return Err(failures.swap_remove(0));
        }
        Ok(lists)
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(AppError::Cancelled);
    }
    Ok(())
}

fn finish_stage(metrics: &mut PipelineMetrics, stage: Stage, start: Instant, input: usize, output: usize) {
    let elapsed = start.elapsed();
    record_stage(stage.as_str(), elapsed.as_secs_f64());
    metrics.record_stage(stage, elapsed, input, output);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use prism_common::config::RerankConfig;
    use prism_common::embeddings::HashingEmbedder;
    use prism_common::errors::{ErrorClass, ErrorCode};
    use prism_common::models::{Chunk, StructuralMetadata};
    use prism_common::reference::StructuralRef;
    use prism_common::store::{InMemoryStore, SearchFilter, SearchHits};
    use prism_common::RequestedModality;
    use prism_search::RelevanceModel;
    use std::time::Duration;
    use tokio_test::assert_ok;

    const DIM: usize = 64;

    /// Fixed answer, optional delay, records prompts
    struct ScriptedModel {
        answer: String,
        delay: Option<Duration>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn answering(answer: &str) -> Arc<Self> {
            Arc::new(Self {
                answer: answer.to_string(),
                delay: None,
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                answer: "too late".to_string(),
                delay: Some(delay),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn last_prompt(&self) -> String {
            self.prompts.lock().last().cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().push(prompt.to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.answer.clone())
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    struct UnreachableRelevance;

    #[async_trait]
    impl RelevanceModel for UnreachableRelevance {
        async fn score(&self, _query: &str, _documents: &[String]) -> Result<Vec<f32>> {
            Err(AppError::Reranker {
                message: "connection refused".into(),
            })
        }

        fn model_name(&self) -> &str {
            "unreachable"
        }
    }

    /// Delays every call, then delegates
    struct SlowStore {
        inner: InMemoryStore,
        delay: Duration,
    }

    #[async_trait]
    impl ContentStore for SlowStore {
        async fn search(&self, modality: Modality, embedding: &[f32], filter: &SearchFilter, k: usize) -> Result<SearchHits> {
            tokio::time::sleep(self.delay).await;
            self.inner.search(modality, embedding, filter, k).await
        }

        async fn get_by_structural_id(&self, modality: Modality, id: &StructuralRef) -> Result<Option<Arc<Chunk>>> {
            tokio::time::sleep(self.delay).await;
            self.inner.get_by_structural_id(modality, id).await
        }

        async fn scan(&self, modality: Modality) -> Result<Vec<Arc<Chunk>>> {
            tokio::time::sleep(self.delay).await;
            self.inner.scan(modality).await
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    /// Unreachable for the listed modalities only
    struct PartitionedOutage {
        inner: InMemoryStore,
        down: Vec<Modality>,
    }

    impl PartitionedOutage {
        fn check(&self, modality: Modality) -> Result<()> {
            if self.down.contains(&modality) {
                return Err(AppError::ContentStoreUnavailable {
                    message: format!("{modality} partition offline"),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ContentStore for PartitionedOutage {
        async fn search(&self, modality: Modality, embedding: &[f32], filter: &SearchFilter, k: usize) -> Result<SearchHits> {
            self.check(modality)?;
            self.inner.search(modality, embedding, filter, k).await
        }

        async fn get_by_structural_id(&self, modality: Modality, id: &StructuralRef) -> Result<Option<Arc<Chunk>>> {
            self.check(modality)?;
            self.inner.get_by_structural_id(modality, id).await
        }

        async fn scan(&self, modality: Modality) -> Result<Vec<Arc<Chunk>>> {
            self.check(modality)?;
            self.inner.scan(modality).await
        }

        async fn health_check(&self) -> Result<()> {
            self.check(Modality::Text)
        }
    }

    fn embedder() -> HashingEmbedder {
        HashingEmbedder::new(DIM)
    }

    fn chunk(id: &str, modality: Modality, content: &str, meta: StructuralMetadata) -> Chunk {
        let mut chunk = Chunk::new(id, modality, content, vec![]).with_metadata(StructuralMetadata {
            document_name: "annual_report.pdf".into(),
            ..meta
        });
        chunk.embedding = embedder().embed_sync(&chunk.text_representation());
        chunk
    }

    fn corpus() -> InMemoryStore {
        let mut store = InMemoryStore::new();
        assert_ok!(store.extend(vec![
            chunk("t_rev", Modality::Text, "Company X revenue was $10B in 2023.", StructuralMetadata {
                page_number: Some(2),
                ..Default::default()
            }),
            chunk("t_profit", Modality::Text, "Company X net profit was $2B in 2023.", StructuralMetadata {
                page_number: Some(3),
                ..Default::default()
            }),
            chunk("fig4", Modality::Image, "Bar chart of quarterly net profit", StructuralMetadata {
                page_number: Some(4),
                captions: vec!["Figure 4: Net Profit Overview".into()],
                ..Default::default()
            }),
            chunk("fig41", Modality::Image, "Line chart of cash flow", StructuralMetadata {
                page_number: Some(9),
                captions: vec!["Figure 41: Cash Flow".into()],
                ..Default::default()
            }),
            chunk("tab2", Modality::Table, "Cloud 6B; Devices 4B", StructuralMetadata {
                title: Some("Table 2: Revenue by Segment".into()),
                headers: vec!["Segment".into(), "Revenue".into()],
                ..Default::default()
            }),
        ]));
        store
    }

    fn pipeline_with(config: AppConfig, store: Arc<dyn ContentStore>, llm: Arc<ScriptedModel>) -> RetrievalPipeline {
        RetrievalPipeline::new(config, store, Arc::new(embedder()), llm).unwrap()
    }

    fn pipeline(llm: Arc<ScriptedModel>) -> RetrievalPipeline {
        pipeline_with(AppConfig::default(), Arc::new(corpus()), llm)
    }

    #[tokio::test]
    async fn test_follow_up_pronoun_reaches_model_resolved() {
        let llm = ScriptedModel::answering("Company X's net profit was $2B [1].");
        let pipeline = pipeline(llm.clone());
        pipeline
            .memory()
            .update_context("s1", "What is the revenue of Company X?", "Company X's revenue was $10B.")
            .await;

        let result = pipeline
            .process_query(Query::new("What about its profit?").with_session("s1"))
            .await;

        assert!(result.success, "{:?}", result.error);
        let prompt = llm.last_prompt();
        assert!(prompt.contains("Question: What about Company X's profit?"));
        assert!(!prompt.contains("its profit"));
        assert!(!result.filtered_sources.is_empty());

        let summary = pipeline.memory().context_summary("s1");
        assert_eq!(summary.conversation_count, 2);
        assert_eq!(summary.last_question.as_deref(), Some("What about its profit?"));
    }

    #[tokio::test]
    async fn test_figure_reference_returns_exact_image() {
        let llm = ScriptedModel::answering("Figure 4 shows quarterly net profit [1].");
        let result = pipeline(llm).process_query(Query::new("show figure 4")).await;

        assert!(result.success);
        assert_eq!(result.metrics.engines.len(), 1);
        let image = &result.metrics.engines[0];
        assert_eq!(image.modality, Modality::Image);
        assert_eq!(image.candidates, 1);
        assert!(image.short_circuited);

        let ids: Vec<&str> = result.filtered_sources.iter().map(|s| s.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["fig4"]);
        assert_eq!(result.filtered_sources[0].page_number, Some(4));
    }

    #[tokio::test]
    async fn test_slow_engines_are_bounded_by_timeout() {
        let mut config = AppConfig::default();
        config.pipeline.engine_timeout_ms = 50;
        let store = Arc::new(SlowStore {
            inner: corpus(),
            delay: Duration::from_secs(2),
        });
        let pipeline = pipeline_with(config, store, ScriptedModel::answering("unused"));

        let started = Instant::now();
        let result = pipeline
            .process_query(Query::new("Company X revenue table").with_modality(RequestedModality::Hybrid))
            .await;
        let elapsed = started.elapsed();

        assert!(result.success);
        assert!(elapsed < Duration::from_millis(50 + 450), "took {elapsed:?}");
        assert!(!result.metrics.engines.is_empty());
        assert!(result.metrics.engines.iter().all(|e| e.timed_out && e.candidates == 0));
        assert!(result.metrics.is_degraded(Stage::Recall));
        assert_eq!(result.answer_text, AppConfig::default().synthesis.empty_context_answer);
        assert!(result.filtered_sources.is_empty());
    }

    #[tokio::test]
    async fn test_reranker_outage_still_generates() {
        let llm = ScriptedModel::answering("Company X revenue was $10B [1].");
        let pipeline = pipeline(llm.clone()).with_reranker(RerankingService::new(
            RerankConfig::default(),
            Arc::new(UnreachableRelevance),
        ));

        let result = pipeline.process_query(Query::new("Company X revenue")).await;
        assert!(result.success);
        assert!(result.metrics.is_degraded(Stage::Rerank));
        assert!(result.metrics.stage(Stage::GenerateAnswer).is_some());
        assert_eq!(llm.prompts.lock().len(), 1);
        assert!(!result.filtered_sources.is_empty());
    }

    #[tokio::test]
    async fn test_negative_answer_has_no_sources() {
        let llm = ScriptedModel::answering("Sorry, no relevant information about the CEO was found [1].");
        let result = pipeline(llm).process_query(Query::new("Who is the CEO of Company X?")).await;
        assert!(result.success);
        assert!(result.filtered_sources.is_empty());
        assert!(result.metrics.stage(Stage::FilterSources).is_some());
    }

    #[tokio::test]
    async fn test_cancellation_discards_partial_results() {
        let pipeline = pipeline(ScriptedModel::slow(Duration::from_secs(5)));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = pipeline
            .process_query_with_cancel(Query::new("Company X revenue").with_session("s1"), &cancel)
            .await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!result.success);
        assert!(result.answer_text.is_empty());
        assert!(result.filtered_sources.is_empty());
        assert_eq!(result.error.as_ref().map(|e| e.code), Some(ErrorCode::Cancelled));

        // No turn was recorded and the session's write slot was released
        assert_eq!(pipeline.memory().context_summary("s1").conversation_count, 0);
        assert_eq!(pipeline.memory().stats().pending_turns, 0);
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_query() {
        let store = Arc::new(PartitionedOutage {
            inner: corpus(),
            down: Modality::ALL.to_vec(),
        });
        let llm = ScriptedModel::answering("unused");
        let pipeline = pipeline_with(AppConfig::default(), store, llm.clone());

        let result = pipeline.process_query(Query::new("Company X revenue")).await;
        assert!(!result.success);
        let error = result.error.unwrap();
        assert_eq!(error.code, ErrorCode::ContentStoreUnavailable);
        assert_eq!(error.class, ErrorClass::Fatal);
        assert!(llm.prompts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_one_failing_engine_does_not_block_others() {
        let store = Arc::new(PartitionedOutage {
            inner: corpus(),
            down: vec![Modality::Table],
        });
        let llm = ScriptedModel::answering("Company X revenue was $10B [1].");
        let pipeline = pipeline_with(AppConfig::default(), store, llm);

        let result = pipeline
            .process_query(Query::new("Company X revenue").with_modality(RequestedModality::Hybrid))
            .await;
        assert!(result.success);
        assert!(result.metrics.is_degraded(Stage::Recall));
        let table = result.metrics.engines.iter().find(|e| e.modality == Modality::Table).unwrap();
        assert!(table.error.is_some());
        assert!(!result.filtered_sources.is_empty());
    }

    #[tokio::test]
    async fn test_empty_query_rejected_before_dispatch() {
        let llm = ScriptedModel::answering("unused");
        let pipeline = pipeline(llm.clone());
        let result = pipeline.process_query(Query::new("   ").with_session("s1")).await;

        assert!(!result.success);
        assert_eq!(result.error.unwrap().class, ErrorClass::UserInput);
        assert!(result.metrics.engines.is_empty());
        assert!(llm.prompts.lock().is_empty());
        assert_eq!(pipeline.memory().stats().active_sessions, 0);
    }

    #[tokio::test]
    async fn test_results_capped_by_max_results() {
        let llm = ScriptedModel::answering("Revenue and profit figures [1] [2].");
        let result = pipeline(llm)
            .process_query(Query::new("Company X revenue profit").with_max_results(1))
            .await;
        assert!(result.success);
        assert!(result.filtered_sources.len() <= 1);
        let filtered = result.metrics.stage(Stage::SmartFilter).unwrap();
        assert_eq!(filtered.output_count, 1);
    }

    #[tokio::test]
    async fn test_low_quality_text_never_reaches_model() {
        let mut store = corpus();
        assert_ok!(store.extend(vec![chunk(
            "t_noise",
            Modality::Text,
            "revenue revenue revenue revenue",
            StructuralMetadata::default(),
        )]));
        let llm = ScriptedModel::answering("Company X revenue was $10B [1].");
        let result = pipeline_with(AppConfig::default(), Arc::new(store), llm.clone())
            .process_query(Query::new("Company X revenue"))
            .await;

        assert!(result.success);
        assert!(result.metrics.stage(Stage::SmartFilter).is_some());
        assert!(!llm.last_prompt().contains("revenue revenue"));
        assert!(result.filtered_sources.iter().all(|s| s.chunk_id != "t_noise"));
    }

    #[tokio::test]
    async fn test_disabled_smart_filter_records_no_stage() {
        let mut config = AppConfig::default();
        config.filter.enabled = false;
        let llm = ScriptedModel::answering("Company X revenue was $10B [1].");
        let result = pipeline_with(config, Arc::new(corpus()), llm)
            .process_query(Query::new("Company X revenue"))
            .await;
        assert!(result.success);
        assert!(result.metrics.stage(Stage::SmartFilter).is_none());
    }
}
