//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over strides 8/16/32 with two anchors per cell,
//! followed by greedy NMS. The input is an RGB image letterboxed into the
//! top-left corner of a 640x640 canvas.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_SCORE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download buffalo_l from insightface into the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    /// 9 outputs carry landmarks, 6 do not.
    with_landmarks: bool,
}

impl FaceDetector {
    /// Load the SCRFD ONNX model (`det_10g.onnx`) from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let outputs = session.outputs().len();
        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs,
            "loaded SCRFD model"
        );

        let with_landmarks = match outputs {
            9 => true,
            6 => false,
            n => {
                return Err(DetectorError::InferenceFailed(format!(
                    "SCRFD model must have 6 or 9 outputs (scores, boxes[, landmarks] per stride), got {n}"
                )))
            }
        };

        Ok(Self {
            session,
            with_landmarks,
        })
    }

    /// Detect faces, sorted by descending confidence, in original image coordinates.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, scale) = preprocess(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let n = SCRFD_STRIDES.len();
        let mut candidates = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let tensor = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = tensor(pos, "scores")?;
            let boxes = tensor(pos + n, "boxes")?;
            let landmarks = if self.with_landmarks {
                Some(tensor(pos + 2 * n, "landmarks")?)
            } else {
                None
            };

            candidates.extend(decode_stride(
                StrideOutput {
                    stride,
                    scores,
                    boxes,
                    landmarks,
                },
                scale,
                SCRFD_SCORE_THRESHOLD,
            ));
        }

        let faces = nms(candidates, SCRFD_NMS_THRESHOLD);
        tracing::debug!(faces = faces.len(), "SCRFD detection");
        Ok(faces)
    }
}

/// Raw outputs of one stride level.
struct StrideOutput<'a> {
    stride: usize,
    scores: &'a [f32],
    boxes: &'a [f32],
    landmarks: Option<&'a [f32]>,
}

/// Resize to fit 640x640 keeping the aspect ratio, place at the top-left,
/// and normalize into an NCHW RGB tensor. Returns the tensor and the scale
/// from original to model coordinates.
fn preprocess(image: &RgbImage) -> (Array4<f32>, f32) {
    let (w, h) = image.dimensions();
    let size = SCRFD_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    if w == 0 || h == 0 {
        return (tensor, 1.0);
    }

    let scale = (SCRFD_INPUT_SIZE as f32 / w as f32).min(SCRFD_INPUT_SIZE as f32 / h as f32);
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    // Padding stays 0.0, which is the normalized mean.
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }
    (tensor, scale)
}

/// Decode the detections of one stride whose score exceeds `threshold`.
///
/// Anchor centers sit on the stride grid; box and landmark outputs are
/// distances/offsets in stride units from those centers.
fn decode_stride(out: StrideOutput<'_>, scale: f32, threshold: f32) -> Vec<BoundingBox> {
    let cells = SCRFD_INPUT_SIZE as usize / out.stride;
    let stride = out.stride as f32;

    out.scores
        .iter()
        .enumerate()
        .take(cells * cells * SCRFD_ANCHORS_PER_CELL)
        .filter(|(_, &score)| score > threshold)
        .filter_map(|(idx, &score)| {
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let cx = (cell % cells) as f32 * stride;
            let cy = (cell / cells) as f32 * stride;

            let d = out.boxes.get(idx * 4..idx * 4 + 4)?;
            let x1 = (cx - d[0] * stride) / scale;
            let y1 = (cy - d[1] * stride) / scale;
            let x2 = (cx + d[2] * stride) / scale;
            let y2 = (cy + d[3] * stride) / scale;

            let landmarks = out
                .landmarks
                .and_then(|kps| kps.get(idx * 10..idx * 10 + 10))
                .map(|k| {
                    std::array::from_fn(|i| {
                        ((cx + k[2 * i] * stride) / scale, (cy + k[2 * i + 1] * stride) / scale)
                    })
                });

            let mut bbox = BoundingBox::from_corners(x1, y1, x2, y2, score);
            bbox.landmarks = landmarks;
            Some(bbox)
        })
        .collect()
}

/// Greedy non-maximum suppression; output sorted by descending confidence.
fn nms(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// Intersection-over-Union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let (ax1, ay1, ax2, ay2) = a.corners();
    let (bx1, by1, bx2, by2) = b.corners();
    let inter = (ax2.min(bx2) - ax1.max(bx1)).max(0.0) * (ay2.min(by2) - ay1.max(by1)).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
