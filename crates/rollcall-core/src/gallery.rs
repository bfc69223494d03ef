//! Labeled reference set of face embeddings.
//!
//! A gallery is built once and then frozen: there is no mutation API after
//! [`Gallery::build`], so a built gallery can be shared behind an `Arc` and
//! queried from any number of threads.

use crate::error::MatchError;
use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// One labeled reference embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub label: String,
    pub embedding: Embedding,
    /// Where the embedding came from (image path), when known.
    pub source: Option<PathBuf>,
}

impl GalleryEntry {
    pub fn new(label: impl Into<String>, embedding: Embedding) -> Self {
        Self {
            label: label.into(),
            embedding,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Ordered, immutable collection of gallery entries with precomputed norms.
#[derive(Debug, Clone)]
pub struct Gallery {
    labels: Vec<String>,
    embeddings: Vec<Embedding>,
    sources: Vec<Option<PathBuf>>,
    norms: Vec<f64>,
    dim: usize,
}

impl Gallery {
    /// Build a gallery from entries, preserving their order.
    ///
    /// All embeddings must share one dimension and be usable (finite, non-zero).
    pub fn build(entries: impl IntoIterator<Item = GalleryEntry>) -> Result<Self, MatchError> {
        let mut builder = GalleryBuilder::default();
        for entry in entries {
            builder.push(entry)?;
        }
        builder.finish()
    }

    /// Build a roster: like [`build`](Self::build) but every label must be unique.
    pub fn build_roster(entries: impl IntoIterator<Item = GalleryEntry>) -> Result<Self, MatchError> {
        let gallery = Self::build(entries)?;
        let mut seen = HashSet::with_capacity(gallery.len());
        for label in &gallery.labels {
            if !seen.insert(label.as_str()) {
                return Err(MatchError::DuplicateIdentity(label.clone()));
            }
        }
        Ok(gallery)
    }

    /// Parallel slices of embeddings and labels, in gallery order.
    pub fn query_all(&self) -> (&[Embedding], &[String]) {
        (&self.embeddings, &self.labels)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Embedding dimension shared by every entry.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn label(&self, idx: usize) -> Option<&str> {
        self.labels.get(idx).map(String::as_str)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Precomputed L2 norms, parallel to [`query_all`](Self::query_all).
    pub(crate) fn norms(&self) -> &[f64] {
        &self.norms
    }

    /// Entries in gallery order, rebuilt as owned values.
    pub fn entries(&self) -> impl Iterator<Item = GalleryEntry> + '_ {
        self.labels
            .iter()
            .zip(&self.embeddings)
            .zip(&self.sources)
            .map(|((label, embedding), source)| GalleryEntry {
                label: label.clone(),
                embedding: embedding.clone(),
                source: source.clone(),
            })
    }
}

/// Append-only construction stage of a [`Gallery`].
#[derive(Debug, Default)]
pub struct GalleryBuilder {
    labels: Vec<String>,
    embeddings: Vec<Embedding>,
    sources: Vec<Option<PathBuf>>,
    norms: Vec<f64>,
}

impl GalleryBuilder {
    /// Append one entry, validating it against the entries already pushed.
    pub fn push(&mut self, entry: GalleryEntry) -> Result<(), MatchError> {
        if let Some(first) = self.embeddings.first() {
            if first.dim() != entry.embedding.dim() {
                return Err(MatchError::DimensionMismatch {
                    expected: first.dim(),
                    actual: entry.embedding.dim(),
                });
            }
        }
        if !entry.embedding.is_usable() {
            return Err(MatchError::DegenerateEmbedding);
        }

        self.norms.push(entry.embedding.norm());
        self.labels.push(entry.label);
        self.embeddings.push(entry.embedding);
        self.sources.push(entry.source);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn finish(self) -> Result<Gallery, MatchError> {
        let dim = self
            .embeddings
            .first()
            .map(Embedding::dim)
            .ok_or(MatchError::EmptyGallery)?;
        Ok(Gallery {
            labels: self.labels,
            embeddings: self.embeddings,
            sources: self.sources,
            norms: self.norms,
            dim,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(label: &str, values: Vec<f32>) -> GalleryEntry {
        GalleryEntry::new(label, Embedding::new(values))
    }

    #[test]
    fn test_build_empty_fails() {
        let err = Gallery::build(Vec::new()).unwrap_err();
        assert_eq!(err, MatchError::EmptyGallery);
    }

    #[test]
    fn test_build_preserves_order() {
        let g = Gallery::build(vec![
            entry("bob", vec![0.0, 1.0]),
            entry("alice", vec![1.0, 0.0]),
            entry("bob", vec![0.5, 0.5]),
        ])
        .unwrap();

        assert_eq!(g.len(), 3);
        assert_eq!(g.dim(), 2);
        let (embeddings, labels) = g.query_all();
        assert_eq!(labels, &["bob", "alice", "bob"]);
        assert_eq!(embeddings[1].values(), &[1.0, 0.0]);
    }

    #[test]
    fn test_build_rejects_mixed_dimensions() {
        let err = Gallery::build(vec![entry("a", vec![1.0, 0.0]), entry("b", vec![1.0, 0.0, 0.0])])
            .unwrap_err();
        assert_eq!(err, MatchError::DimensionMismatch { expected: 2, actual: 3 });
    }

    #[test]
    fn test_build_rejects_zero_vector() {
        let err = Gallery::build(vec![entry("a", vec![0.0, 0.0])]).unwrap_err();
        assert_eq!(err, MatchError::DegenerateEmbedding);
    }

    #[test]
    fn test_roster_rejects_duplicates() {
        let err = Gallery::build_roster(vec![
            entry("carol", vec![1.0, 0.0]),
            entry("carol", vec![0.0, 1.0]),
        ])
        .unwrap_err();
        assert_eq!(err, MatchError::DuplicateIdentity("carol".into()));
    }

    #[test]
    fn test_entries_roundtrip_sources() {
        let g = Gallery::build(vec![entry("a", vec![1.0]).with_source("data/a/1.jpg")]).unwrap();
        let entries: Vec<_> = g.entries().collect();
        assert_eq!(entries[0].source.as_deref(), Some(std::path::Path::new("data/a/1.jpg")));
    }
}
