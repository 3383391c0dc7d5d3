/// Documentation cache REST API endpoints

use crate::{
    api::{ApiError, AppState},
    cache::{CacheStats, PrefetchReport},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

/// Request body for prefetch
#[derive(Debug, Deserialize)]
pub struct PrefetchRequest {
    pub keywords: Vec<String>,
}

/// Create cache routes
pub fn create_cache_routes() -> Router<AppState> {
    Router::new()
        .route("/api/cache", get(cache_stats).delete(clear_cache))
        .route("/api/cache/entries/{key}", get(get_entry).put(put_entry))
        .route("/api/cache/entries/{key}/pin", post(pin_entry).delete(unpin_entry))
        .route("/api/cache/prefetch", post(prefetch))
}

/// GET /api/cache
async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.service.cache_stats().await)
}

/// DELETE /api/cache
async fn clear_cache(State(state): State<AppState>) -> Json<Value> {
    state.service.cache_clear().await;
    Json(json!({ "message": "Documentation cache cleared" }))
}

/// Look up a cached document
///
/// GET /api/cache/entries/{key}
/// Returns: { "hit": true, "cache_key": "...", "payload": ... } or 404 { "hit": false }
async fn get_entry(State(state): State<AppState>, Path(key): Path<String>) -> (StatusCode, Json<Value>) {
    match state.service.cache_get(&key).await {
        Some(payload) => (
            StatusCode::OK,
            Json(json!({ "hit": true, "cache_key": key, "payload": payload })),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "hit": false, "cache_key": key })),
        ),
    }
}

/// Store a document; the body is the payload itself
///
/// PUT /api/cache/entries/{key}
async fn put_entry(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    state.service.cache_put(&key, payload).await?;
    Ok(Json(json!({ "cache_key": key, "message": "Cached" })))
}

/// POST /api/cache/entries/{key}/pin
async fn pin_entry(State(state): State<AppState>, Path(key): Path<String>) -> Result<Json<Value>, ApiError> {
    state.service.cache_pin(&key).await?;
    Ok(Json(json!({ "cache_key": key, "pinned": true })))
}

/// DELETE /api/cache/entries/{key}/pin
async fn unpin_entry(State(state): State<AppState>, Path(key): Path<String>) -> Result<Json<Value>, ApiError> {
    state.service.cache_unpin(&key).await?;
    Ok(Json(json!({ "cache_key": key, "pinned": false })))
}

/// Prefetch documentation for intent keywords
///
/// POST /api/cache/prefetch
/// Body: { "keywords": ["slack", "daily report"] }
async fn prefetch(
    State(state): State<AppState>,
    Json(payload): Json<PrefetchRequest>,
) -> Json<PrefetchReport> {
    Json(state.service.prefetch_with_report(&payload.keywords).await)
}
