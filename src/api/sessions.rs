/// Session REST API endpoints
///
/// Start, resume, update and delete sessions, record validator runs and
/// take checkpoints. Session keys in paths are the `{tenant}.{name}` keys
/// returned on creation.

use crate::{
    api::{ApiError, AppState},
    service::{ResumedSession, ValidationOutcome, ValidationResult},
    session::{Checkpoint, SessionMutation, SessionRecord},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Request body for session creation
#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub tenant_id: Option<String>,
    pub name: String,
    pub intent: String,
    #[serde(default)]
    pub estimated_steps: u32,
}

/// Response for session creation/deletion
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_key: String,
    pub message: String,
}

/// Query string of the listing endpoint
#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    pub tenant_id: Option<String>,
}

/// Request body for checkpoint creation
#[derive(Debug, Default, Deserialize)]
pub struct CheckpointRequest {
    #[serde(default)]
    pub label: String,
}

/// Create session routes
pub fn create_session_routes() -> Router<AppState> {
    Router::new()
        .route("/api/sessions", post(start_session).get(list_sessions))
        .route(
            "/api/sessions/{key}",
            get(resume_session).patch(update_session).delete(delete_session),
        )
        .route("/api/sessions/{key}/validations", post(record_validation))
        .route("/api/sessions/{key}/checkpoints", post(create_checkpoint))
}

/// Start a new session
///
/// POST /api/sessions
/// Body: { "tenant_id": "acme", "name": "Slack alerts", "intent": "...", "estimated_steps": 6 }
async fn start_session(
    State(state): State<AppState>,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    if payload.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }

    let key = state
        .service
        .start_session(
            payload.tenant_id.as_deref(),
            &payload.name,
            &payload.intent,
            payload.estimated_steps,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            session_key: key.to_string(),
            message: format!("Session '{}' started", payload.name),
        }),
    ))
}

/// List a tenant's sessions, most recently updated first
///
/// GET /api/sessions?tenant_id=acme
async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListSessionsQuery>,
) -> Json<Value> {
    let sessions = state.service.list_sessions(query.tenant_id.as_deref()).await;
    Json(json!({ "sessions": sessions }))
}

/// Resume a session
///
/// GET /api/sessions/{key}
/// Returns: { "record": {...}, "next_step": {...} }
async fn resume_session(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ResumedSession>, ApiError> {
    Ok(Json(state.service.resume_session(&key).await?))
}

/// Apply a partial update
///
/// PATCH /api/sessions/{key}
/// Body: { "state_patch": {...}, "step_index": 2, "token_usage_delta": 120, ... }
async fn update_session(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(mutation): Json<SessionMutation>,
) -> Result<Json<SessionRecord>, ApiError> {
    Ok(Json(state.service.update_session(&key, mutation).await?))
}

/// Delete a session; deleting twice is fine
///
/// DELETE /api/sessions/{key}
async fn delete_session(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    state.service.delete_session(&key).await?;

    Ok(Json(SessionResponse {
        message: format!("Session '{}' deleted", key),
        session_key: key,
    }))
}

/// Record a validator run
///
/// POST /api/sessions/{key}/validations
/// Body: { "valid": false, "issues": [{ "severity": "error", "message": "...", "doc_key": "nodes.slack" }] }
async fn record_validation(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(result): Json<ValidationResult>,
) -> Result<Json<ValidationOutcome>, ApiError> {
    Ok(Json(state.service.record_validation(&key, result).await?))
}

/// Take a manual checkpoint
///
/// POST /api/sessions/{key}/checkpoints
/// Body: { "label": "before refactor" }
async fn create_checkpoint(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(payload): Json<CheckpointRequest>,
) -> Result<(StatusCode, Json<Checkpoint>), ApiError> {
    let checkpoint = state.service.checkpoint(&key, &payload.label).await?;
    Ok((StatusCode::CREATED, Json(checkpoint)))
}
