//! Incoming query

use super::chunk::Modality;
use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Longest accepted query text, in characters
pub const MAX_QUERY_CHARS: usize = 4000;

/// Largest accepted `max_results`
pub const MAX_RESULTS_LIMIT: usize = 100;

fn default_max_results() -> usize { 10 }

/// Modality the caller asked for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestedModality {
    #[default]
    Auto,
    Text,
    Image,
    Table,
    Hybrid,
}

impl RequestedModality {
    /// Explicit modality set, or `None` for `auto`
    pub fn explicit(&self) -> Option<Vec<Modality>> {
        match self {
            RequestedModality::Auto => None,
            RequestedModality::Text => Some(vec![Modality::Text]),
            RequestedModality::Image => Some(vec![Modality::Image]),
            RequestedModality::Table => Some(vec![Modality::Table]),
            RequestedModality::Hybrid => Some(Modality::ALL.to_vec()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Query {
    #[validate(length(min = 1, max = 4000))]
    pub text: String,

    #[serde(default)]
    pub requested_modality: RequestedModality,

    #[serde(default)]
    pub session_id: Option<String>,

    #[validate(range(min = 1, max = 100))]
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            requested_modality: RequestedModality::Auto,
            session_id: None,
            max_results: default_max_results(),
        }
    }

    pub fn with_modality(mut self, modality: RequestedModality) -> Self {
        self.requested_modality = modality;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Reject empty or malformed queries before any engine dispatch
    pub fn check(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(AppError::EmptyQuery);
        }
        self.validate()?;
        Ok(())
    }
}
