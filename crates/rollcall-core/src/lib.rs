//! rollcall-core: face gallery matching, evaluation and attendance.
//!
//! Detection (SCRFD) and embedding (ArcFace) run through ONNX Runtime behind
//! the [`FaceAnalyzer`] trait; everything downstream of an embedding is pure
//! and testable without models.

pub mod alignment;
pub mod analyzer;
pub mod annotate;
pub mod attendance;
pub mod dataset;
pub mod detector;
pub mod error;
pub mod evaluator;
pub mod gallery;
pub mod matcher;
pub mod onnx;
pub mod recognizer;
pub mod table;
pub mod types;

use std::path::PathBuf;

pub use analyzer::{embed_primary, EmbedOutcome, FaceAnalyzer};
pub use error::MatchError;
pub use gallery::{Gallery, GalleryEntry};
pub use matcher::{CosineMatcher, MatchResult, Matcher, UNKNOWN_LABEL};
pub use onnx::OnnxFaceAnalyzer;
pub use types::{BoundingBox, DetectedFace, Embedding, Threshold};

/// Model directory: `$ROLLCALL_MODEL_DIR`, else `$XDG_DATA_HOME/rollcall/models`,
/// else `~/.local/share/rollcall/models`, else `./models`.
pub fn default_model_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("ROLLCALL_MODEL_DIR") {
        return PathBuf::from(dir);
    }
    let data_home = std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/share")));
    match data_home {
        Some(base) => base.join("rollcall").join("models"),
        None => PathBuf::from("models"),
    }
}
