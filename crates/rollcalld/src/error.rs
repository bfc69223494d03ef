use crate::engine::EngineError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rollcall_core::analyzer::AnalyzerError;
use rollcall_core::dataset::DatasetError;
use rollcall_core::table::TableError;
use rollcall_core::MatchError;
use serde_json::json;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("match error: {0}")]
    Match(#[from] MatchError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("table error: {0}")]
    Table(#[from] TableError),

    #[error("internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Match(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Engine(EngineError::Analyzer(AnalyzerError::UnreadableImage { .. })) => StatusCode::BAD_REQUEST,
            ApiError::Engine(EngineError::Dataset(DatasetError::Gallery(_))) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Engine(EngineError::ChannelClosed) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Engine(_) | ApiError::Table(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Match(_) => "MATCH_ERROR",
            ApiError::Engine(_) => "ENGINE_ERROR",
            ApiError::Table(_) => "TABLE_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }

        let body = Json(json!({
            "success": false,
            "error": {
                "code": self.error_code(),
                "message": self.to_string(),
            }
        }));
        (status, body).into_response()
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Internal(format!("io error: {err}"))
    }
}
