//! HTTP surface of the attendance daemon.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rollcall_core::attendance::AttendanceRecord;
use rollcall_core::table::save_attendance;
use rollcall_core::CosineMatcher;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = if state.config.cors_enabled {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
    };
    let body_limit = state.config.max_upload_bytes();

    Router::new()
        .route("/upload_photo", post(upload_photo))
        .route("/analyze_attendance", get(analyze_attendance))
        .route("/update_attendance", post(update_attendance))
        .route("/download_csv", get(download_csv))
        .route("/reset_photos", post(reset_photos))
        .route("/reload_roster", post(reload_roster))
        .route("/status", get(status))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    /// Data URL (`data:image/jpeg;base64,...`) or bare base64.
    pub image: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub filename: String,
    pub faces: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AttendanceTable {
    pub attendance: Vec<AttendanceRecord>,
}

/// Store a classroom photo and record the faces found in it.
pub async fn upload_photo(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UploadRequest>,
) -> ApiResult<Json<UploadResponse>> {
    let bytes = decode_data_url(&req.image)?;
    let faces = state.engine.analyze("uploaded photo", bytes.clone()).await?;

    let count = faces.len();
    let filename = state.store_upload(&bytes, faces).await?;
    tracing::info!(file = %filename, bytes = bytes.len(), faces = count, "photo uploaded");
    Ok(Json(UploadResponse {
        success: true,
        filename,
        faces: count,
    }))
}

/// Recompute attendance over every photo uploaded so far and persist it.
pub async fn analyze_attendance(State(state): State<Arc<AppState>>) -> ApiResult<Json<AttendanceTable>> {
    let records = blocking(move || {
        let records = match state.roster() {
            Some(roster) => state
                .book
                .aggregate(&CosineMatcher, &roster, state.config.threshold())?,
            None => {
                tracing::warn!("attendance requested with an empty roster");
                state.book.replace_records(Vec::new());
                Vec::new()
            }
        };
        save_attendance(&state.config.attendance_path, &records)?;
        Ok(records)
    })
    .await?;
    Ok(Json(AttendanceTable { attendance: records }))
}

/// Replace the attendance table with manual corrections.
pub async fn update_attendance(
    State(state): State<Arc<AppState>>,
    Json(table): Json<AttendanceTable>,
) -> ApiResult<Json<Value>> {
    let roster = state.roster();
    let known: HashSet<&str> = roster
        .as_deref()
        .map(|g| g.labels().iter().map(String::as_str).collect())
        .unwrap_or_default();
    if let Some(unknown) = table.attendance.iter().find(|r| !known.contains(r.name.as_str())) {
        return Err(ApiError::BadRequest(format!("{:?} is not on the roster", unknown.name)));
    }

    blocking(move || {
        save_attendance(&state.config.attendance_path, &table.attendance)?;
        tracing::info!(records = table.attendance.len(), "attendance updated manually");
        state.book.replace_records(table.attendance);
        Ok(())
    })
    .await?;
    Ok(Json(json!({ "success": true })))
}

/// Run matching and table writes off the async workers.
async fn blocking<T, F>(work: F) -> ApiResult<T>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(format!("blocking task failed: {e}")))?
}

/// Serve the attendance CSV as a download.
pub async fn download_csv(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let path = &state.config.attendance_path;
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound(
                "no attendance table yet; call /analyze_attendance first".into(),
            ))
        }
        Err(e) => return Err(e.into()),
    };
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("attendance.csv");

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"")),
        ],
        bytes,
    ))
}

pub async fn reset_photos(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let removed = state.reset_photos().await?;
    Ok(Json(json!({ "success": true, "removed": removed })))
}

pub async fn reload_roster(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let reload = state.reload_roster().await?;
    let skipped: Vec<Value> = reload
        .skipped
        .iter()
        .map(|s| json!({ "path": s.path.display().to_string(), "reason": s.reason }))
        .collect();
    Ok(Json(json!({
        "success": true,
        "roster": reload.loaded,
        "skipped": skipped,
    })))
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "service": "rollcalld",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "roster": state.roster().map(|g| g.len()).unwrap_or(0),
        "observations": state.book.observation_count(),
        "threshold": state.config.threshold().value(),
        "distance_tolerance": state.config.distance_tolerance,
    }))
}

/// Payload of a data URL, or the whole string when there is no header.
fn decode_data_url(data: &str) -> ApiResult<Vec<u8>> {
    let payload = match data.split_once(',') {
        Some((header, payload)) if header.starts_with("data:") => payload,
        _ => data,
    };
    STANDARD
        .decode(payload.trim())
        .map_err(|e| ApiError::BadRequest(format!("image is not valid base64: {e}")))
}
