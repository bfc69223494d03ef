use thiserror::Error;

/// Failures of gallery construction, matching and evaluation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("gallery is empty, nothing to match against")]
    EmptyGallery,
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("degenerate embedding: zero norm or non-finite component")]
    DegenerateEmbedding,
    #[error("insufficient samples for stratified split: {0}")]
    InsufficientSamples(String),
    #[error("duplicate identity in roster: {0}")]
    DuplicateIdentity(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}
