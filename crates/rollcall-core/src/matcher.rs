//! Nearest-neighbor matching of probe embeddings against a gallery.

use crate::error::MatchError;
use crate::gallery::Gallery;
use crate::types::{cosine_with_norms, Embedding, Threshold};
use rayon::prelude::*;

/// Label reported for a probe whose best similarity does not clear the threshold.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Label of the most similar gallery entry, regardless of the threshold.
    pub best_label: String,
    /// Position of that entry in gallery order.
    pub best_index: usize,
    /// Cosine similarity of the best match [-1, 1].
    pub confidence: f32,
    /// `confidence > threshold`.
    pub accepted: bool,
}

impl MatchResult {
    /// The best label when accepted, [`UNKNOWN_LABEL`] otherwise.
    pub fn display_label(&self) -> &str {
        if self.accepted {
            &self.best_label
        } else {
            UNKNOWN_LABEL
        }
    }
}

/// Strategy for comparing a probe embedding against a gallery.
pub trait Matcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &Gallery,
        threshold: Threshold,
    ) -> Result<MatchResult, MatchError>;

    /// Match every probe independently. Runs on the rayon pool; output order
    /// follows `probes`, and the first failing probe's error is returned.
    fn compare_many(
        &self,
        probes: &[Embedding],
        gallery: &Gallery,
        threshold: Threshold,
    ) -> Result<Vec<MatchResult>, MatchError>
    where
        Self: Sync,
    {
        probes
            .par_iter()
            .map(|probe| self.compare(probe, gallery, threshold))
            .collect()
    }
}

/// Exhaustive cosine similarity matcher.
///
/// Visits every gallery entry; on equal similarity the earliest entry wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &Gallery,
        threshold: Threshold,
    ) -> Result<MatchResult, MatchError> {
        if gallery.is_empty() {
            return Err(MatchError::EmptyGallery);
        }
        if probe.dim() != gallery.dim() {
            return Err(MatchError::DimensionMismatch {
                expected: gallery.dim(),
                actual: probe.dim(),
            });
        }
        if !probe.is_usable() {
            return Err(MatchError::DegenerateEmbedding);
        }

        let probe_norm = probe.norm();
        let (embeddings, labels) = gallery.query_all();

        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx = 0;
        for (i, (candidate, &norm)) in embeddings.iter().zip(gallery.norms()).enumerate() {
            let sim = cosine_with_norms(probe, probe_norm, candidate, norm);
            // Strict `>` keeps the first occurrence on ties.
            if sim > best_sim {
                best_sim = sim;
                best_idx = i;
            }
        }

        Ok(MatchResult {
            best_label: labels[best_idx].clone(),
            best_index: best_idx,
            confidence: best_sim,
            accepted: threshold.accepts(best_sim),
        })
    }
}
