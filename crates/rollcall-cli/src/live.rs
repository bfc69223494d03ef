//! Webcam recognition loop.

use anyhow::{Context, Result};
use image::RgbImage;
use rollcall_core::annotate::{annotate_frame, draw_annotations, AnnotationInstruction, ACCEPT_COLOR};
use rollcall_core::{CosineMatcher, FaceAnalyzer, Gallery, Threshold};
use rollcall_hw::Camera;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Consecutive capture failures tolerated before giving up on the camera.
const MAX_CAPTURE_FAILURES: u32 = 10;

pub struct LiveOptions {
    pub device: String,
    pub threshold: Threshold,
    pub output: PathBuf,
    pub save_every: u64,
    pub max_frames: Option<u64>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LiveStats {
    pub frames: u64,
    pub recognized: u64,
    pub unknown: u64,
}

/// Run the capture loop on a blocking thread until Ctrl-C or `max_frames`.
pub async fn run<A>(analyzer: A, gallery: Gallery, options: LiveOptions) -> Result<LiveStats>
where
    A: FaceAnalyzer + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, stopping after this frame");
            flag.store(true, Ordering::SeqCst);
        }
    });

    tokio::task::spawn_blocking(move || capture_loop(analyzer, &gallery, &options, &stop)).await?
}

fn capture_loop<A: FaceAnalyzer>(
    mut analyzer: A,
    gallery: &Gallery,
    options: &LiveOptions,
    stop: &AtomicBool,
) -> Result<LiveStats> {
    let camera = Camera::open(&options.device).with_context(|| format!("opening {}", options.device))?;
    let mut stream = camera.stream()?;
    tracing::info!(
        device = %options.device,
        width = camera.width,
        height = camera.height,
        gallery = gallery.len(),
        "live recognition started"
    );

    let mut stats = LiveStats::default();
    let mut failures = 0u32;
    while !should_stop(stop, stats.frames, options.max_frames) {
        let frame = match stream.next_frame() {
            Ok(frame) => {
                failures = 0;
                frame
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(error = %e, failures, "frame capture failed");
                if failures >= MAX_CAPTURE_FAILURES {
                    return Err(e).context("camera stopped delivering frames");
                }
                continue;
            }
        };
        stats.frames += 1;

        let mut image = frame.image;
        let instructions = process_frame(&mut analyzer, gallery, options.threshold, &image)?;
        for inst in &instructions {
            if inst.color == ACCEPT_COLOR {
                stats.recognized += 1;
            } else {
                stats.unknown += 1;
            }
        }
        if !instructions.is_empty() {
            let texts: Vec<&str> = instructions.iter().map(|i| i.text.as_str()).collect();
            println!("frame {}: {}", frame.sequence, texts.join(", "));
        }

        if stats.frames % options.save_every == 0 {
            if let Err(e) = save_annotated(&mut image, &instructions, frame.sequence, &options.output) {
                tracing::warn!(path = %options.output.display(), error = %e, "failed to save annotated frame");
            }
        }
    }

    tracing::info!(frames = stats.frames, "live recognition stopped");
    Ok(stats)
}

/// Draw the boxes into `image`, save it to `output`, and write the labels
/// drawn on it to the `.json` file beside it.
fn save_annotated(
    image: &mut RgbImage,
    instructions: &[AnnotationInstruction],
    sequence: u32,
    output: &Path,
) -> Result<()> {
    draw_annotations(image, instructions);
    image
        .save(output)
        .with_context(|| format!("saving {}", output.display()))?;

    let faces: Vec<_> = instructions
        .iter()
        .map(|inst| {
            let (x1, y1, x2, y2) = inst.bbox.corners();
            json!({
                "text": inst.text,
                "box": [x1, y1, x2, y2],
                "recognized": inst.color == ACCEPT_COLOR,
            })
        })
        .collect();
    let labels = output.with_extension("json");
    let body = serde_json::to_vec_pretty(&json!({ "sequence": sequence, "faces": faces }))?;
    std::fs::write(&labels, body).with_context(|| format!("writing {}", labels.display()))?;
    Ok(())
}

fn should_stop(stop: &AtomicBool, frames: u64, max_frames: Option<u64>) -> bool {
    stop.load(Ordering::SeqCst) || max_frames.is_some_and(|max| frames >= max)
}

/// Detect and annotate one frame. A failed detection counts as no faces.
fn process_frame<A: FaceAnalyzer>(
    analyzer: &mut A,
    gallery: &Gallery,
    threshold: Threshold,
    image: &RgbImage,
) -> Result<Vec<AnnotationInstruction>> {
    let faces = analyzer.detect(image).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "detection failed, treating frame as empty");
        Vec::new()
    });
    Ok(annotate_frame(&CosineMatcher, &faces, gallery, threshold)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::analyzer::AnalyzerError;
    use rollcall_core::annotate::REJECT_COLOR;
    use rollcall_core::{BoundingBox, DetectedFace, Embedding, GalleryEntry};

    /// Yields the queued detection results in order.
    struct ScriptedAnalyzer(Vec<Result<Vec<DetectedFace>, AnalyzerError>>);

    impl FaceAnalyzer for ScriptedAnalyzer {
        fn detect(&mut self, _image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError> {
            self.0.remove(0)
        }

        fn embed_whole(&mut self, _image: &RgbImage) -> Result<Embedding, AnalyzerError> {
            Err(AnalyzerError::Embedding("unused".into()))
        }
    }

    fn face(values: Vec<f32>) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox::from_corners(1.0, 1.0, 6.0, 6.0, 0.9),
            embedding: Some(Embedding::new(values)),
        }
    }

    fn gallery() -> Gallery {
        Gallery::build(vec![GalleryEntry::new("alice", Embedding::new(vec![1.0, 0.0]))]).unwrap()
    }

    #[test]
    fn test_failed_detection_is_empty_frame() {
        let mut analyzer = ScriptedAnalyzer(vec![
            Err(AnalyzerError::Detection("model hiccup".into())),
            Ok(vec![face(vec![1.0, 0.0]), face(vec![0.0, 1.0])]),
        ]);
        let image = RgbImage::new(8, 8);
        let t = Threshold::similarity(0.5);

        assert!(process_frame(&mut analyzer, &gallery(), t, &image).unwrap().is_empty());

        let out = process_frame(&mut analyzer, &gallery(), t, &image).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].color, ACCEPT_COLOR);
        assert_eq!(out[1].color, REJECT_COLOR);
        assert!(out[1].text.starts_with("Unknown"));
    }

    #[test]
    fn test_dimension_mismatch_surfaces() {
        let mut analyzer = ScriptedAnalyzer(vec![Ok(vec![face(vec![1.0, 0.0, 0.0])])]);
        let err = process_frame(&mut analyzer, &gallery(), Threshold::similarity(0.5), &RgbImage::new(4, 4));
        assert!(err.is_err());
    }

    #[test]
    fn test_saved_frame_carries_its_labels() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("live.png");
        let mut analyzer = ScriptedAnalyzer(vec![Ok(vec![face(vec![1.0, 0.0]), face(vec![0.0, 1.0])])]);
        let mut image = RgbImage::new(8, 8);
        let instructions = process_frame(&mut analyzer, &gallery(), Threshold::similarity(0.5), &image).unwrap();

        save_annotated(&mut image, &instructions, 7, &output).unwrap();

        assert_eq!(image::open(&output).unwrap().to_rgb8().get_pixel(1, 1).0, REJECT_COLOR.0);
        let labels: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("live.json")).unwrap()).unwrap();
        assert_eq!(labels["sequence"], 7);
        assert_eq!(labels["faces"][0]["text"], "alice (100.00%)");
        assert_eq!(labels["faces"][0]["recognized"], true);
        assert_eq!(labels["faces"][0]["box"][2], 6.0);
        assert_eq!(labels["faces"][1]["recognized"], false);
    }

    #[test]
    fn test_should_stop() {
        let flag = AtomicBool::new(false);
        assert!(!should_stop(&flag, 3, None));
        assert!(!should_stop(&flag, 3, Some(4)));
        assert!(should_stop(&flag, 4, Some(4)));
        flag.store(true, Ordering::SeqCst);
        assert!(should_stop(&flag, 0, None));
    }
}
