//! Configuration management for Prism
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with PRISM__)
//! - Configuration files (config/default.toml, config/{env}.toml)
//! - Default values
//!
//! Every component receives its section in its constructor. Nothing reads
//! configuration from global state.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Query router term sets
    pub router: RouterConfig,

    /// Per-modality recall engine configuration
    pub recall: RecallConfig,

    /// Fusion & deduplication
    pub fusion: FusionConfig,

    /// Reranking service
    pub rerank: RerankConfig,

    /// Content-quality filter ahead of synthesis
    pub filter: FilterConfig,

    /// Answer synthesis and source filtering
    pub synthesis: SynthesisConfig,

    /// Conversational memory
    pub memory: MemoryConfig,

    /// Language model client
    pub llm: LlmConfig,

    /// Embedding client
    pub embedding: EmbeddingConfig,

    /// Orchestration limits
    pub pipeline: PipelineConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Terms that indicate an image/figure intent
    pub image_terms: Vec<String>,

    /// Terms that indicate a tabular intent
    pub table_terms: Vec<String>,

    /// Weight of an explicit structural reference ("figure 4") in classification
    pub reference_weight: f32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        let image_terms = [
            "image", "images", "picture", "pictures", "photo", "photos", "figure", "figures",
            "chart", "charts", "graph", "graphs", "diagram", "diagrams", "screenshot",
            "illustration", "logo", "icon", "plot",
            "图片", "图像", "照片", "图表", "截图", "界面", "图标", "示意图", "插图",
        ];
        let table_terms = [
            "table", "tables", "tabular", "spreadsheet", "column", "columns", "row", "rows",
            "statistics", "percentage", "percent", "ratio", "ranking", "amount", "quantity",
            "表格", "数据", "统计", "数字", "金额", "数量", "比例", "百分比", "排名", "对比",
        ];
        Self {
            image_terms: image_terms.iter().map(|s| s.to_string()).collect(),
            table_terms: table_terms.iter().map(|s| s.to_string()).collect(),
            reference_weight: 3.0,
        }
    }
}

/// Independent on/off switches for the six recall layers
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct LayerToggles {
    pub structural: bool,
    pub vector: bool,
    pub keyword: bool,
    pub hybrid: bool,
    pub fuzzy: bool,
    pub expansion: bool,
}

impl Default for LayerToggles {
    fn default() -> Self {
        Self {
            structural: true,
            vector: true,
            keyword: true,
            hybrid: true,
            fuzzy: true,
            expansion: true,
        }
    }
}

/// Weight of each searchable field in the lexical layer
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct FieldWeights {
    pub title: f32,
    pub caption: f32,
    pub summary: f32,
    pub body: f32,
}

impl Default for FieldWeights {
    fn default() -> Self {
        Self {
            title: 0.6,
            caption: 0.0,
            summary: 0.0,
            body: 0.4,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Whether the router may dispatch to this engine
    pub enabled: bool,

    /// Layer switches
    pub layers: LayerToggles,

    /// Output cap applied by every layer
    pub max_per_layer: usize,

    /// Fixed raw score assigned to structural exact matches
    pub structural_score: f32,

    /// Initial k for vector search
    pub vector_pool: usize,

    /// Upper bound the pool may widen to when filtered search under-returns
    pub vector_pool_max: usize,

    /// Pool growth factor per widening step
    pub pool_growth: usize,

    /// Minimum cosine similarity for vector hits
    pub min_similarity: f32,

    /// Similarity floor used for one retry when the vector layer stays empty
    pub fallback_similarity: f32,

    /// Lexical field weights
    pub field_weights: FieldWeights,

    /// Vector share of the hybrid linear combination
    pub hybrid_vector_weight: f32,

    /// Keyword share of the hybrid linear combination
    pub hybrid_keyword_weight: f32,

    /// Minimum term similarity for the fuzzy layer
    pub fuzzy_threshold: f32,

    /// Query expansion runs only below this many distinct candidates
    pub min_candidates: usize,

    /// Maximum expansion terms appended to the query
    pub max_expansions: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            layers: LayerToggles::default(),
            max_per_layer: 20,
            structural_score: 10.0,
            vector_pool: 20,
            vector_pool_max: 320,
            pool_growth: 2,
            min_similarity: 0.2,
            fallback_similarity: 0.05,
            field_weights: FieldWeights::default(),
            hybrid_vector_weight: 0.6,
            hybrid_keyword_weight: 0.4,
            fuzzy_threshold: 0.8,
            min_candidates: 3,
            max_expansions: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RecallConfig {
    pub text: EngineConfig,
    pub image: EngineConfig,
    pub table: EngineConfig,
}

impl Default for RecallConfig {
    fn default() -> Self {
        let image = EngineConfig {
            min_similarity: 0.3,
            field_weights: FieldWeights {
                title: 0.3,
                caption: 0.35,
                summary: 0.2,
                body: 0.15,
            },
            ..EngineConfig::default()
        };
        let table = EngineConfig {
            field_weights: FieldWeights {
                title: 0.3,
                caption: 0.25,
                summary: 0.2,
                body: 0.25,
            },
            ..EngineConfig::default()
        };
        Self {
            text: EngineConfig::default(),
            image,
            table,
        }
    }
}

/// Score normalization applied per candidate batch
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    MinMax,
    ZScore,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Output ceiling, bounds reranking cost
    pub ceiling: usize,

    /// Per-batch score normalization
    pub normalization: Normalization,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            ceiling: 50,
            normalization: Normalization::MinMax,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RerankConfig {
    /// Disable to pass fusion scores straight through
    pub enabled: bool,

    /// Rerank API endpoint; the local lexical model is used when unset
    pub endpoint: Option<String>,

    /// API key for the rerank endpoint
    pub api_key: Option<String>,

    /// Rerank model name
    pub model: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Share of the relevance model in the final score
    pub model_weight: f32,

    /// Share of the rule-based lexical score in the final score
    pub rule_weight: f32,

    /// Candidates beyond this count are dropped before scoring
    pub max_candidates: usize,

    /// Cache relevance scores
    pub cache_enabled: bool,

    /// Cache capacity in entries
    pub cache_capacity: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: None,
            api_key: None,
            model: "gte-rerank-v2".to_string(),
            timeout_secs: 10,
            model_weight: 0.6,
            rule_weight: 0.4,
            max_candidates: 100,
            cache_enabled: true,
            cache_capacity: 4096,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Top-N reranked candidates placed in the context block
    pub max_context_results: usize,

    /// Character budget per candidate excerpt
    pub max_content_chars: usize,

    /// Retries after the first language-model attempt
    pub max_retries: u32,

    /// First backoff delay in milliseconds
    pub initial_backoff_ms: u64,

    /// Backoff ceiling in milliseconds
    pub max_backoff_ms: u64,

    /// Timeout of a single language-model attempt in milliseconds
    pub attempt_timeout_ms: u64,

    /// Phrases that mark an answer as "nothing relevant found"
    pub not_found_phrases: Vec<String>,

    /// Answer used when the language model keeps failing
    pub fallback_answer: String,

    /// Answer used when there is no context at all
    pub empty_context_answer: String,

    /// Minimum relevance for an uncited source to be kept
    pub relevance_threshold: f32,

    /// Floor on kept sources for a positive answer
    pub min_sources: usize,

    /// Ceiling on kept sources
    pub max_sources: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        let phrases = [
            "no relevant information",
            "insufficient information",
            "could not find",
            "couldn't find",
            "cannot find",
            "not mentioned in the",
            "not found in the",
            "没有找到相关",
            "未找到相关",
            "没有相关信息",
            "无法回答",
        ];
        Self {
            max_context_results: 10,
            max_content_chars: 1000,
            max_retries: 2,
            initial_backoff_ms: 200,
            max_backoff_ms: 2000,
            attempt_timeout_ms: 30_000,
            not_found_phrases: phrases.iter().map(|s| s.to_string()).collect(),
            fallback_answer: "Sorry, there is insufficient information available to answer this question right now."
                .to_string(),
            empty_context_answer: "Sorry, no relevant information was found in the available documents."
                .to_string(),
            relevance_threshold: 0.3,
            min_sources: 1,
            max_sources: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterConfig {
    pub enabled: bool,

    /// Candidates with fewer characters are dropped
    pub min_content_length: usize,

    /// Candidates with more characters are dropped
    pub max_content_length: usize,

    /// Text candidates must score strictly above this quality
    pub quality_threshold: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_content_length: 10,
            max_content_length: 10_000,
            quality_threshold: 0.3,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Maximum live sessions (least recently used evicted first)
    pub max_sessions: usize,

    /// Turns kept per session (oldest dropped first)
    pub max_turns: usize,

    /// Entities tracked per session
    pub max_entities: usize,

    /// Sessions idle longer than this are cleared
    pub idle_timeout_secs: u64,

    /// Interval of the optional background sweeper
    pub sweep_interval_secs: u64,

    /// Minimum score for a pronoun to be replaced
    pub resolution_threshold: f32,

    /// Recency decay per turn of age
    pub recency_decay: f32,

    /// Turns rendered into the context summary
    pub summary_turns: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_sessions: 1000,
            max_turns: 10,
            max_entities: 32,
            idle_timeout_secs: 1800,
            sweep_interval_secs: 60,
            resolution_threshold: 0.35,
            recency_decay: 0.6,
            summary_turns: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Chat completions endpoint
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// API key
    pub api_key: Option<String>,

    /// Model name
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Per-attempt timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Maximum output tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// System prompt
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, hashing
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum attempts per request
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,

    /// First retry delay in milliseconds
    #[serde(default = "default_embedding_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Retry delay cap in milliseconds
    #[serde(default = "default_embedding_max_backoff")]
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Per-engine recall timeout in milliseconds
    #[serde(default = "default_engine_timeout")]
    pub engine_timeout_ms: u64,

    /// Timeout for embedding the query in milliseconds
    #[serde(default = "default_embed_timeout")]
    pub embed_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level or EnvFilter directive (debug, info, prism_search=debug)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_llm_endpoint() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_llm_model() -> String { "gpt-4o-mini".to_string() }
fn default_llm_timeout() -> u64 { 30 }
fn default_max_tokens() -> usize { 1000 }
fn default_temperature() -> f32 { 0.3 }
fn default_system_prompt() -> String { "You are a careful assistant that answers from the supplied documents only.".to_string() }
fn default_embedding_provider() -> String { "hashing".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dimension() -> usize { 256 }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_embedding_initial_backoff() -> u64 { 200 }
fn default_embedding_max_backoff() -> u64 { 2000 }
fn default_engine_timeout() -> u64 { 3000 }
fn default_embed_timeout() -> u64 { 5000 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_service_name() -> String { "prism".to_string() }

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key: None,
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            system_prompt: default_system_prompt(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
            initial_backoff_ms: default_embedding_initial_backoff(),
            max_backoff_ms: default_embedding_max_backoff(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            engine_timeout_ms: default_engine_timeout(),
            embed_timeout_ms: default_embed_timeout(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let env = std::env::var("PRISM_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with PRISM__ prefix
            // e.g., PRISM__SYNTHESIS__MAX_RETRIES=3
            .add_source(
                Environment::with_prefix("PRISM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("PRISM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get the per-engine recall timeout as Duration
    pub fn engine_timeout(&self) -> Duration {
        Duration::from_millis(self.pipeline.engine_timeout_ms)
    }

    /// Get the query embedding timeout as Duration
    pub fn embed_timeout(&self) -> Duration {
        Duration::from_millis(self.pipeline.embed_timeout_ms)
    }
}
