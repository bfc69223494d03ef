//! [`FaceAnalyzer`] backed by the InsightFace buffalo_l ONNX models.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{DetectedFace, Embedding};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// SCRFD detector plus ArcFace recognizer. Not shareable across threads
/// while in use; create one per worker.
pub struct OnnxFaceAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceAnalyzer {
    pub fn load(model_dir: &Path) -> Result<Self, ModelLoadError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self { detector, recognizer })
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError> {
        let boxes = self
            .detector
            .detect(image)
            .map_err(|e| AnalyzerError::Detection(e.to_string()))?;

        let mut faces = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            // A face that fails to embed is still reported, just without an embedding.
            let embedding = match self.recognizer.extract(image, &bbox) {
                Ok(embedding) => Some(embedding),
                Err(e) => {
                    tracing::warn!(error = %e, confidence = bbox.confidence, "face embedding failed");
                    None
                }
            };
            faces.push(DetectedFace { bbox, embedding });
        }
        Ok(faces)
    }

    fn embed_whole(&mut self, image: &RgbImage) -> Result<Embedding, AnalyzerError> {
        self.recognizer
            .embed_resized(image)
            .map_err(|e| AnalyzerError::Embedding(e.to_string()))
    }
}
