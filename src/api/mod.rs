/// HTTP API Layer
///
/// REST endpoints over the context service:
/// - Session lifecycle, validation recording and checkpoints
/// - Documentation cache lookups, writes and prefetch
/// - Pending-sync inspection and on-demand reconciliation

use crate::{
    error::{ErrorKind, StoreError},
    service::ContextService,
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;

// Session endpoints
pub mod sessions;

// Documentation cache endpoints
pub mod cache;

// Pending-sync and reconciliation endpoints
pub mod sync;

// Re-export router builders
pub use cache::create_cache_routes;
pub use sessions::create_session_routes;
pub use sync::create_sync_routes;

/// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ContextService>,
}

/// Handler error rendered as `{ "error", "key", "message" }`
#[derive(Debug)]
pub enum ApiError {
    Store(StoreError),
    BadRequest(String),
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        Self::Store(error)
    }
}

/// HTTP status for each error kind
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorKind::InvalidState => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Io => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Store(error) => {
                let status = status_for(error.kind());
                if status.is_server_error() {
                    tracing::error!("❌ Request failed: {}", error);
                }
                let body = json!({
                    "error": error.kind(),
                    "key": error.key(),
                    "message": error.to_string(),
                });
                (status, Json(body)).into_response()
            }
            ApiError::BadRequest(message) => {
                let body = json!({
                    "error": "bad_request",
                    "key": null,
                    "message": message,
                });
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
        }
    }
}
