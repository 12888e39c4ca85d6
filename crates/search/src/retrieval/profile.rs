//! Modality-specific field layout

use prism_common::config::FieldWeights;
use prism_common::models::{Chunk, Modality};
use prism_common::reference::RefKind;

/// How an engine reads chunks of its modality
#[derive(Debug, Clone, Copy)]
pub struct ModalityProfile {
    pub modality: Modality,

    /// Identifier kind matched by the structural layer
    pub reference_kind: Option<RefKind>,

    pub weights: FieldWeights,
}

impl ModalityProfile {
    pub fn new(modality: Modality, weights: FieldWeights) -> Self {
        let reference_kind = match modality {
            Modality::Text => None,
            Modality::Image => Some(RefKind::Figure),
            Modality::Table => Some(RefKind::Table),
        };
        Self {
            modality,
            reference_kind,
            weights,
        }
    }

    /// Searchable fields with their weights; zero-weight fields are omitted
    pub fn fields(&self, chunk: &Chunk) -> Vec<(f32, String)> {
        let meta = &chunk.metadata;
        let mut captions = meta.captions.join(" ");
        if self.modality == Modality::Table && !meta.headers.is_empty() {
            captions.push(' ');
            captions.push_str(&meta.headers.join(" "));
        }

        [
            (self.weights.title, meta.title.clone().unwrap_or_default()),
            (self.weights.caption, captions),
            (self.weights.summary, meta.summary.clone().unwrap_or_default()),
            (self.weights.body, chunk.content.clone()),
        ]
        .into_iter()
        .filter(|(weight, text)| *weight > 0.0 && !text.trim().is_empty())
        .collect()
    }
}
