//! Chunk record with structural metadata

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Content modality of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Image,
    Table,
}

impl Modality {
    pub const ALL: [Modality; 3] = [Modality::Text, Modality::Image, Modality::Table];

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Image => "image",
            Modality::Table => "table",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source-document and modality-specific fields attached at ingestion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuralMetadata {
    /// Name of the source document
    pub document_name: String,

    /// Page number within the source document
    pub page_number: Option<u32>,

    /// Section, figure or table title
    pub title: Option<String>,

    /// Image captions, or the table caption
    pub captions: Vec<String>,

    /// Generated summary of an image or table
    pub summary: Option<String>,

    /// Table column headers
    pub headers: Vec<String>,

    /// Table column count
    pub column_count: Option<usize>,

    /// Table row count
    pub row_count: Option<usize>,

    /// Anything else the ingestion pipeline recorded
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Immutable unit of retrievable content
///
/// For images and tables `content` is the generated textual description,
/// never the raw pixels or cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub modality: Modality,
    pub content: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: StructuralMetadata,
}

impl Chunk {
    pub fn new(
        id: impl Into<String>,
        modality: Modality,
        content: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            id: id.into(),
            modality,
            content: content.into(),
            embedding,
            metadata: StructuralMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: StructuralMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Text used for relevance scoring and prompt context.
    ///
    /// Images render title, captions and description; tables render title,
    /// headers, summary and content.
    pub fn text_representation(&self) -> String {
        let meta = &self.metadata;
        let mut parts: Vec<String> = Vec::new();
        if let Some(title) = meta.title.as_deref().filter(|t| !t.is_empty()) {
            parts.push(title.to_string());
        }
        match self.modality {
            Modality::Text => {}
            Modality::Image => {
                parts.extend(meta.captions.iter().filter(|c| !c.is_empty()).cloned());
            }
            Modality::Table => {
                parts.extend(meta.captions.iter().filter(|c| !c.is_empty()).cloned());
                if !meta.headers.is_empty() {
                    parts.push(meta.headers.join(" | "));
                }
                if let Some(summary) = meta.summary.as_deref().filter(|s| !s.is_empty()) {
                    parts.push(summary.to_string());
                }
            }
        }
        if !self.content.is_empty() {
            parts.push(self.content.clone());
        }
        parts.join("\n")
    }

    /// Fields that may carry a figure or table identifier
    pub fn identifier_fields(&self) -> impl Iterator<Item = &str> {
        self.metadata
            .title
            .as_deref()
            .into_iter()
            .chain(self.metadata.captions.iter().map(String::as_str))
    }
}
