//! Pipeline error taxonomy
//!
//! Every variant carries a numeric code and a class. The class decides
//! whether the pipeline rejects the query up front, absorbs the failure at
//! the stage where it happened, or aborts.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // User input errors (1xxx)
    ValidationError,
    EmptyQuery,

    // Content store errors (7xxx)
    ContentStoreUnavailable,
    DimensionMismatch,
    DuplicateChunk,

    // External capability errors (8xxx)
    EmbeddingError,
    EmbeddingTimeout,
    LanguageModelError,
    LanguageModelTimeout,
    RerankerError,
    RecallLayerError,
    UpstreamError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    Cancelled,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // User input (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::EmptyQuery => 1002,

            // Content store (7xxx)
            ErrorCode::ContentStoreUnavailable => 7001,
            ErrorCode::DimensionMismatch => 7002,
            ErrorCode::DuplicateChunk => 7003,

            // External (8xxx)
            ErrorCode::EmbeddingError => 8001,
            ErrorCode::EmbeddingTimeout => 8002,
            ErrorCode::LanguageModelError => 8003,
            ErrorCode::LanguageModelTimeout => 8004,
            ErrorCode::RerankerError => 8005,
            ErrorCode::RecallLayerError => 8006,
            ErrorCode::UpstreamError => 8007,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::Cancelled => 9003,
        }
    }
}

/// How a failure propagates through the pipeline
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Rejected before any engine dispatch
    UserInput,
    /// Absorbed at the stage where it happened, with a fallback
    Recoverable,
    /// Aborts the query with `success=false`
    Fatal,
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // User input errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>
    },

    #[error("Query text is empty")]
    EmptyQuery,

    // Content store errors
    #[error("Content store unavailable: {message}")]
    ContentStoreUnavailable { message: String },

    #[error("Embedding dimension mismatch for {modality}: expected {expected}, got {actual}")]
    DimensionMismatch {
        modality: String,
        expected: usize,
        actual: usize,
    },

    #[error("Duplicate chunk id: {id}")]
    DuplicateChunk { id: String },

    // External capability errors
    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Embedding timeout after {timeout_ms}ms")]
    EmbeddingTimeout { timeout_ms: u64 },

    #[error("Language model error: {message}")]
    LanguageModel { message: String },

    #[error("Language model timeout after {timeout_ms}ms")]
    LanguageModelTimeout { timeout_ms: u64 },

    #[error("Reranker error: {message}")]
    Reranker { message: String },

    #[error("Recall layer {layer} failed: {message}")]
    RecallLayer { layer: String, message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Query cancelled")]
    Cancelled,
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::EmptyQuery => ErrorCode::EmptyQuery,
            AppError::ContentStoreUnavailable { .. } => ErrorCode::ContentStoreUnavailable,
            AppError::DimensionMismatch { .. } => ErrorCode::DimensionMismatch,
            AppError::DuplicateChunk { .. } => ErrorCode::DuplicateChunk,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::EmbeddingTimeout { .. } => ErrorCode::EmbeddingTimeout,
            AppError::LanguageModel { .. } => ErrorCode::LanguageModelError,
            AppError::LanguageModelTimeout { .. } => ErrorCode::LanguageModelTimeout,
            AppError::Reranker { .. } => ErrorCode::RerankerError,
            AppError::RecallLayer { .. } => ErrorCode::RecallLayerError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Cancelled => ErrorCode::Cancelled,
        }
    }

    /// Classify the error against the pipeline's propagation policy
    pub fn class(&self) -> ErrorClass {
        match self {
            AppError::Validation { .. } |
            AppError::EmptyQuery => ErrorClass::UserInput,

            AppError::ContentStoreUnavailable { .. } |
            AppError::EmbeddingError { .. } |
            AppError::EmbeddingTimeout { .. } |
            AppError::Configuration { .. } |
            AppError::Cancelled => ErrorClass::Fatal,

            AppError::DimensionMismatch { .. } |
            AppError::DuplicateChunk { .. } |
            AppError::LanguageModel { .. } |
            AppError::LanguageModelTimeout { .. } |
            AppError::Reranker { .. } |
            AppError::RecallLayer { .. } |
            AppError::HttpClient(_) |
            AppError::Internal { .. } => ErrorClass::Recoverable,
        }
    }

    /// Check if this error must abort the query
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    /// Check if this error was caused by the caller's input
    pub fn is_user_input(&self) -> bool {
        self.class() == ErrorClass::UserInput
    }
}

/// Structured error details surfaced alongside a failed result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub numeric_code: u16,
    pub class: ErrorClass,
    pub message: String,
}

impl From<&AppError> for ErrorDetails {
    fn from(err: &AppError) -> Self {
        let code = err.code();
        Self {
            code,
            numeric_code: code.as_code(),
            class: err.class(),
            message: err.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        let field = err.field_errors().keys().next().map(|f| f.to_string());
        AppError::Validation {
            message: err.to_string(),
            field,
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}
