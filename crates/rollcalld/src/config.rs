use rollcall_core::Threshold;
use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: 0.0.0.0:5000).
    pub bind_addr: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Roster folder: one image per student, file stem = name.
    pub roster_dir: PathBuf,
    /// Where uploaded classroom photos are stored.
    pub upload_dir: PathBuf,
    /// Attendance table written on every analysis or manual update.
    pub attendance_path: PathBuf,
    /// Cosine distance tolerance; a face matches when `similarity > 1 - tolerance`.
    pub distance_tolerance: f32,
    /// Maximum request body in MiB (base64 photos are ~4/3 of the file size).
    pub max_upload_mb: usize,
    pub cors_enabled: bool,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("ROLLCALL_BIND").unwrap_or_else(|_| "0.0.0.0:5000".to_string()),
            model_dir: rollcall_core::default_model_dir(),
            roster_dir: env_path("ROLLCALL_ROSTER_DIR", "known_faces"),
            upload_dir: env_path("ROLLCALL_UPLOAD_DIR", "classroom_photos"),
            attendance_path: env_path("ROLLCALL_ATTENDANCE_PATH", "attendance.csv"),
            distance_tolerance: env_f32("ROLLCALL_DISTANCE_THRESHOLD", 0.65),
            max_upload_mb: env_usize("ROLLCALL_MAX_UPLOAD_MB", 20),
            cors_enabled: std::env::var("ROLLCALL_CORS_ENABLED")
                .map(|v| v != "0")
                .unwrap_or(true),
        }
    }

    /// Acceptance threshold for roster matches.
    pub fn threshold(&self) -> Threshold {
        Threshold::from_distance(self.distance_tolerance)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

fn env_path(key: &str, default: &str) -> PathBuf {
    std::env::var_os(key)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
