//! Answer synthesis
//!
//! Per query the synthesizer walks
//! `CollectContext -> GenerateAnswer -> FilterSources -> Done`, with an
//! `Error` state reachable from every step. Language-model failures never
//! surface as errors: attempts are retried with exponential backoff and
//! then replaced by a templated answer. Only cancellation reaches `Error`.

mod source_filter;

pub use source_filter::SourceFilter;

use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use prism_common::config::SynthesisConfig;
use prism_common::errors::{AppError, Result};
use prism_common::metrics::{record_llm_attempt, record_llm_fallback, record_stage};
use prism_common::models::{Candidate, PipelineMetrics, SourceRef, Stage};
use prism_common::text::truncate_chars;
use prism_common::{CancellationToken, LanguageModel};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::memory::ContextSummary;

const HISTORY_ANSWER_CHARS: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisState {
    CollectContext,
    GenerateAnswer,
    FilterSources,
    Done,
    Error,
}

/// One numbered entry of the context block
#[derive(Debug, Clone)]
pub struct ContextEntry {
    /// 1-based marker used for `[n]` citations
    pub marker: usize,
    pub excerpt: String,
    pub candidate: Candidate,
}

#[derive(Debug, Clone, Default)]
pub struct ContextBlock {
    pub text: String,
    pub entries: Vec<ContextEntry>,
}

impl ContextBlock {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Where the answer text came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnswerSource {
    Model { attempts: u32 },
    Fallback { reason: String, attempts: u32 },
    EmptyContext,
}

#[derive(Debug, Clone)]
pub struct Synthesis {
    pub answer_text: String,
    pub sources: Vec<SourceRef>,
    pub answer_source: AnswerSource,
    pub metrics: PipelineMetrics,

    /// States visited, in order
    pub trace: Vec<SynthesisState>,
}

enum Step {
    CollectContext,
    GenerateAnswer(ContextBlock),
    FilterSources(ContextBlock, String, AnswerSource),
    Done(String, Vec<SourceRef>, AnswerSource),
    Error(AppError),
}

impl Step {
    fn state(&self) -> SynthesisState {
        match self {
            Step::CollectContext => SynthesisState::CollectContext,
            Step::GenerateAnswer(_) => SynthesisState::GenerateAnswer,
            Step::FilterSources(..) => SynthesisState::FilterSources,
            Step::Done(..) => SynthesisState::Done,
            Step::Error(_) => SynthesisState::Error,
        }
    }
}

/// Synthesis pipeline
pub struct Synthesizer {
    config: SynthesisConfig,
    llm: Arc<dyn LanguageModel>,
    filter: SourceFilter,
}

impl Synthesizer {
    pub fn new(config: SynthesisConfig, llm: Arc<dyn LanguageModel>) -> Self {
        let filter = SourceFilter::new(&config);
        Self { config, llm, filter }
    }

    /// Generate an attributed answer from reranked candidates.
    ///
    /// Fails only with [`AppError::Cancelled`].
    pub async fn synthesize(
        &self,
        query: &str,
        candidates: &[Candidate],
        history: Option<&ContextSummary>,
        cancel: &CancellationToken,
    ) -> Result<Synthesis> {
        let mut metrics = PipelineMetrics::default();
        let mut trace = Vec::with_capacity(4);
        let mut step = Step::CollectContext;

        loop {
            trace.push(step.state());
            if cancel.is_cancelled() && !matches!(step, Step::Error(_)) {
                step = Step::Error(AppError::Cancelled);
                continue;
            }

            step = match step {
                Step::CollectContext => {
                    let start = Instant::now();
                    let block = self.collect_context(candidates);
                    finish_stage(&mut metrics, Stage::CollectContext, start, candidates.len(), block.entries.len());
                    Step::GenerateAnswer(block)
                }
                Step::GenerateAnswer(block) => {
                    let start = Instant::now();
                    let generated = if block.is_empty() {
                        Ok((self.config.empty_context_answer.clone(), AnswerSource::EmptyContext))
                    } else {
                        let prompt = self.build_prompt(query, &block, history);
                        self.generate(&prompt, cancel).await
                    };
                    match generated {
                        Ok((answer, source)) => {
                            if let AnswerSource::Fallback { reason, .. } = &source {
                                metrics.mark_degraded(Stage::GenerateAnswer, reason.clone());
                            }
                            finish_stage(&mut metrics, Stage::GenerateAnswer, start, block.entries.len(), 1);
                            Step::FilterSources(block, answer, source)
                        }
                        Err(err) => {
                            finish_stage(&mut metrics, Stage::GenerateAnswer, start, block.entries.len(), 0);
                            Step::Error(err)
                        }
                    }
                }
                Step::FilterSources(block, answer, source) => {
                    let start = Instant::now();
                    let sources = self.filter.filter(&answer, &block.entries);
                    finish_stage(&mut metrics, Stage::FilterSources, start, block.entries.len(), sources.len());
                    Step::Done(answer, sources, source)
                }
                Step::Done(answer_text, sources, answer_source) => {
                    return Ok(Synthesis {
                        answer_text,
                        sources,
                        answer_source,
                        metrics,
                        trace,
                    });
                }
                Step::Error(err) => {
                    tracing::info!(error = %err, steps = trace.len(), "Synthesis aborted");
                    return Err(err);
                }
            };
        }
    }

    /// Top-N candidates, truncated and numbered
    pub fn collect_context(&self, candidates: &[Candidate]) -> ContextBlock {
        let mut block = ContextBlock::default();
        for (idx, candidate) in candidates.iter().take(self.config.max_context_results).enumerate() {
            let marker = idx + 1;
            let chunk = &candidate.chunk;
            let excerpt = truncate_chars(&chunk.text_representation(), self.config.max_content_chars);

            let _ = write!(block.text, "[{marker}] {}", chunk.metadata.document_name);
            if let Some(page) = chunk.metadata.page_number {
                let _ = write!(block.text, ", page {page}");
            }
            let _ = write!(block.text, " ({})\n{excerpt}\n\n", chunk.modality);

            block.entries.push(ContextEntry {
                marker,
                excerpt,
                candidate: candidate.clone(),
            });
        }
        block
    }

    fn build_prompt(&self, query: &str, block: &ContextBlock, history: Option<&ContextSummary>) -> String {
        let mut prompt = String::from(
            "Answer the question using only the numbered context below. \
             Cite every source you use as [n]. If the context does not contain the answer, \
             reply that no relevant information was found. Do not make up information.\n\n",
        );
        if let Some(history) = history.filter(|h| h.has_context) {
            prompt.push_str("Conversation so far:\n");
            prompt.push_str(&history.render(HISTORY_ANSWER_CHARS));
            prompt.push_str("\n\n");
        }
        prompt.push_str("Context:\n");
        prompt.push_str(block.text.trim_end());
        let _ = write!(prompt, "\n\nQuestion: {query}\n\nAnswer:");
        prompt
    }

    /// Call the language model with retries; falls back on exhaustion
    async fn generate(&self, prompt: &str, cancel: &CancellationToken) -> Result<(String, AnswerSource)> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.config.initial_backoff_ms))
            .with_max_interval(Duration::from_millis(self.config.max_backoff_ms))
            .with_max_elapsed_time(None)
            .build();
        let max_attempts = self.config.max_retries + 1;
        let attempt_timeout = Duration::from_millis(self.config.attempt_timeout_ms);

        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let llm = &self.llm;
        let operation = move || async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let outcome = match tokio::time::timeout(attempt_timeout, llm.generate(prompt)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(AppError::LanguageModelTimeout {
                    timeout_ms: attempt_timeout.as_millis() as u64,
                }),
            };
            record_llm_attempt(llm.model_name(), outcome.is_ok());

            match outcome {
                Ok(text) => Ok(text),
                Err(err) if attempt < max_attempts => {
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        error = %err,
                        model = llm.model_name(),
                        "Language model attempt failed, retrying"
                    );
                    Err(backoff::Error::transient(err))
                }
                Err(err) => Err(backoff::Error::permanent(err)),
            }
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            result = retry(policy, operation) => result,
        };
        let attempts = counter.load(Ordering::SeqCst);

        match result {
            Ok(text) => Ok((text.trim().to_string(), AnswerSource::Model { attempts })),
            Err(err) => {
                tracing::warn!(
                    attempts,
                    error = %err,
                    model = self.llm.model_name(),
                    "Language model unavailable, using fallback answer"
                );
                record_llm_fallback("retries_exhausted");
                Ok((
                    self.config.fallback_answer.clone(),
                    AnswerSource::Fallback {
                        reason: err.to_string(),
                        attempts,
                    },
                ))
            }
        }
    }
}

fn finish_stage(metrics: &mut PipelineMetrics, stage: Stage, start: Instant, input: usize, output: usize) {
    let elapsed = start.elapsed();
    record_stage(stage.as_str(), elapsed.as_secs_f64());
    metrics.record_stage(stage, elapsed, input, output);
}
