/// Pending-sync inspection and reconciliation endpoints

use crate::{
    api::{ApiError, AppState},
    storage::ReconcileReport,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};

/// Create sync routes
pub fn create_sync_routes() -> Router<AppState> {
    Router::new()
        .route("/api/sync/pending", get(pending_sync))
        .route("/api/sync/reconcile", post(reconcile))
}

/// Keys still owed to the remote store
///
/// GET /api/sync/pending
/// Returns: { "count": 1, "pending": [{ "key": "...", "op": "put", "attempts": 2, ... }] }
async fn pending_sync(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let pending = state.service.pending_sync().await?;
    Ok(Json(json!({ "count": pending.len(), "pending": pending })))
}

/// Run a reconciliation sweep now
///
/// POST /api/sync/reconcile
/// Returns the sweep report, or 202 when a sweep is already running
async fn reconcile(State(state): State<AppState>) -> Result<Response, ApiError> {
    let report: Option<ReconcileReport> = state.service.reconcile().await?;

    Ok(match report {
        Some(report) => Json(report).into_response(),
        None => (
            StatusCode::ACCEPTED,
            Json(json!({ "status": "already_running" })),
        )
            .into_response(),
    })
}
