//! Face analysis collaborator: image in, detected faces with embeddings out.
//!
//! The model is an explicit object created by the caller and passed by
//! reference; nothing in this crate holds a global model instance.

use crate::types::{DetectedFace, Embedding};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("unreadable image {path}: {reason}")]
    UnreadableImage { path: String, reason: String },
    #[error("detection failed: {0}")]
    Detection(String),
    #[error("embedding failed: {0}")]
    Embedding(String),
}

/// Detector + embedder pair.
pub trait FaceAnalyzer {
    /// Detect faces, best first. An empty result is a valid "no face" outcome.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError>;

    /// Embed the whole image as one face, without detection.
    fn embed_whole(&mut self, image: &RgbImage) -> Result<Embedding, AnalyzerError>;
}

impl<A: FaceAnalyzer + ?Sized> FaceAnalyzer for Box<A> {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError> {
        (**self).detect(image)
    }

    fn embed_whole(&mut self, image: &RgbImage) -> Result<Embedding, AnalyzerError> {
        (**self).embed_whole(image)
    }
}

/// How an image's primary embedding was obtained.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbedOutcome {
    /// The detector found a face with a usable embedding.
    Detected(DetectedFace),
    /// No usable detection; the whole image was embedded instead.
    FallbackUsed(Embedding),
    /// Neither stage produced a usable embedding.
    Failed(String),
}

impl EmbedOutcome {
    pub fn embedding(&self) -> Option<&Embedding> {
        match self {
            Self::Detected(face) => face.usable_embedding(),
            Self::FallbackUsed(embedding) => Some(embedding),
            Self::Failed(_) => None,
        }
    }

    pub fn into_embedding(self) -> Option<Embedding> {
        match self {
            Self::Detected(face) => face.embedding.filter(Embedding::is_usable),
            Self::FallbackUsed(embedding) => Some(embedding),
            Self::Failed(_) => None,
        }
    }
}

/// Two-stage embedding: the first detected face with a usable embedding,
/// otherwise the whole-image embedding.
pub fn embed_primary<A: FaceAnalyzer + ?Sized>(analyzer: &mut A, image: &RgbImage) -> EmbedOutcome {
    let detect_failure = match analyzer.detect(image) {
        Ok(faces) => match faces.into_iter().find(|f| f.usable_embedding().is_some()) {
            Some(face) => return EmbedOutcome::Detected(face),
            None => "no usable face detected".to_string(),
        },
        Err(e) => e.to_string(),
    };

    match analyzer.embed_whole(image) {
        Ok(embedding) if embedding.is_usable() => EmbedOutcome::FallbackUsed(embedding),
        Ok(_) => EmbedOutcome::Failed(format!("{detect_failure}; fallback embedding is degenerate")),
        Err(e) => EmbedOutcome::Failed(format!("{detect_failure}; fallback failed: {e}")),
    }
}

/// Decode an image file into RGB.
///
/// The format is sniffed from the content, so a mislabeled extension still loads.
pub fn load_rgb(path: &Path) -> Result<RgbImage, AnalyzerError> {
    let unreadable = |reason: String| AnalyzerError::UnreadableImage {
        path: path.display().to_string(),
        reason,
    };
    image::ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| unreadable(e.to_string()))?
        .decode()
        .map(|img| img.to_rgb8())
        .map_err(|e| unreadable(e.to_string()))
}

/// Decode an in-memory encoded image into RGB.
pub fn decode_rgb(name: &str, bytes: &[u8]) -> Result<RgbImage, AnalyzerError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgb8())
        .map_err(|e| AnalyzerError::UnreadableImage {
            path: name.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::types::BoundingBox;

    /// Analyzer keyed on the top-left pixel: red channel selects the face
    /// embedding, green channel 0 makes detection find nothing, green 1 makes
    /// detection fail, blue 1 makes the fallback fail.
    pub struct PixelAnalyzer;

    impl PixelAnalyzer {
        pub fn image(red: u8, green: u8, blue: u8) -> RgbImage {
            RgbImage::from_pixel(4, 4, image::Rgb([red, green, blue]))
        }

        fn vector(red: u8) -> Embedding {
            let angle = red as f32 / 255.0 * std::f32::consts::FRAC_PI_2;
            Embedding::new(vec![angle.cos(), angle.sin()])
        }
    }

    impl FaceAnalyzer for PixelAnalyzer {
        fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError> {
            let [r, g, _] = image.get_pixel(0, 0).0;
            match g {
                0 => Ok(Vec::new()),
                1 => Err(AnalyzerError::Detection("boom".into())),
                _ => Ok(vec![DetectedFace {
                    bbox: BoundingBox::from_corners(0.0, 0.0, 4.0, 4.0, 0.99),
                    embedding: Some(Self::vector(r)),
                }]),
            }
        }

        fn embed_whole(&mut self, image: &RgbImage) -> Result<Embedding, AnalyzerError> {
            let [r, _, b] = image.get_pixel(0, 0).0;
            if b == 1 {
                return Err(AnalyzerError::Embedding("fallback boom".into()));
            }
            Ok(Self::vector(r))
        }
    }
}
