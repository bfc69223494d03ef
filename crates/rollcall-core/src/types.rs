use crate::error::MatchError;
use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Build a box from corner coordinates `(x1, y1, x2, y2)`.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Self {
        Self {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence,
            landmarks: None,
        }
    }

    /// Corner coordinates `(x1, y1, x2, y2)`.
    pub fn corners(&self) -> (f32, f32, f32, f32) {
        (self.x, self.y, self.x + self.width, self.y + self.height)
    }
}

/// Face embedding vector (512-dimensional for ArcFace `w600k_r50`).
///
/// Values are fixed once produced; read them through [`values`](Self::values).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn with_model_version(mut self, version: &str) -> Self {
        self.model_version = Some(version.to_string());
        self
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// L2 norm, accumulated in f64.
    pub fn norm(&self) -> f64 {
        self.values
            .iter()
            .map(|&v| (v as f64) * (v as f64))
            .sum::<f64>()
            .sqrt()
    }

    /// True when the vector can take part in cosine similarity:
    /// non-empty, every component finite, non-zero norm.
    pub fn is_usable(&self) -> bool {
        !self.values.is_empty() && self.values.iter().all(|v| v.is_finite()) && self.norm() > 0.0
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> Result<f32, MatchError> {
        if self.dim() != other.dim() {
            return Err(MatchError::DimensionMismatch {
                expected: other.dim(),
                actual: self.dim(),
            });
        }
        if !self.is_usable() || !other.is_usable() {
            return Err(MatchError::DegenerateEmbedding);
        }
        Ok(cosine_with_norms(self, self.norm(), other, other.norm()))
    }
}

/// Cosine similarity given precomputed, non-zero norms. Clamped to [-1, 1]
/// to absorb rounding in the f64 accumulation.
pub(crate) fn cosine_with_norms(a: &Embedding, norm_a: f64, b: &Embedding, norm_b: f64) -> f32 {
    let dot: f64 = a
        .values
        .iter()
        .zip(b.values.iter())
        .map(|(&x, &y)| x as f64 * y as f64)
        .sum();
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0) as f32
}

/// Minimum cosine similarity required to accept a match.
///
/// The recognizer and the attendance service use differently scaled settings,
/// so a threshold is always passed per operation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold(f32);

impl Threshold {
    /// Threshold expressed directly as a minimum similarity (recognizer: 0.5).
    pub fn similarity(min_similarity: f32) -> Self {
        Self(min_similarity)
    }

    /// Threshold derived from a distance tolerance: `1 - tolerance`
    /// (attendance: tolerance 0.65 accepts similarity above 0.35).
    pub fn from_distance(tolerance: f32) -> Self {
        Self(1.0 - tolerance)
    }

    pub fn value(self) -> f32 {
        self.0
    }

    /// Strict comparison: a similarity equal to the threshold is rejected.
    pub fn accepts(self, similarity: f32) -> bool {
        similarity > self.0
    }
}

/// A detected face as reported by the detector collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Option<Embedding>,
}

impl DetectedFace {
    /// The embedding, unless it is missing or degenerate ("no usable detection").
    pub fn usable_embedding(&self) -> Option<&Embedding> {
        self.embedding.as_ref().filter(|e| e.is_usable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&b).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        assert!(a.similarity(&b).unwrap().abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![-1.0, 0.0]);
        assert!((a.similarity(&b).unwrap() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_scale_invariant() {
        let a = Embedding::new(vec![3.0, 4.0]);
        let b = Embedding::new(vec![0.3, 0.4]);
        assert!((a.similarity(&b).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector_is_degenerate() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), Err(MatchError::DegenerateEmbedding));
    }

    #[test]
    fn test_cosine_similarity_nan_is_degenerate() {
        let a = Embedding::new(vec![f32::NAN, 1.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), Err(MatchError::DegenerateEmbedding));
    }

    #[test]
    fn test_cosine_similarity_dimension_mismatch() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(
            a.similarity(&b),
            Err(MatchError::DimensionMismatch { expected: 2, actual: 3 })
        );
    }

    #[test]
    fn test_threshold_from_distance() {
        let t = Threshold::from_distance(0.65);
        assert!((t.value() - 0.35).abs() < 1e-6);
        assert!(t.accepts(0.36));
        assert!(!t.accepts(0.30));
    }

    #[test]
    fn test_threshold_is_strict() {
        let t = Threshold::similarity(0.5);
        assert!(!t.accepts(0.5));
        assert!(t.accepts(0.5001));
    }

    #[test]
    fn test_bbox_corners_roundtrip() {
        let b = BoundingBox::from_corners(10.0, 20.0, 110.0, 170.0, 0.9);
        assert_eq!(b.width, 100.0);
        assert_eq!(b.height, 150.0);
        assert_eq!(b.corners(), (10.0, 20.0, 110.0, 170.0));
    }

    #[test]
    fn test_detected_face_zero_embedding_not_usable() {
        let face = DetectedFace {
            bbox: BoundingBox::from_corners(0.0, 0.0, 1.0, 1.0, 1.0),
            embedding: Some(Embedding::new(vec![0.0; 4])),
        };
        assert!(face.usable_embedding().is_none());

        let missing = DetectedFace { embedding: None, ..face };
        assert!(missing.usable_embedding().is_none());
    }
}
