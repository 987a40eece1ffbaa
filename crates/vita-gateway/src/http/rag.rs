use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;

use crate::app::AppState;
use crate::auth::require_auth;
use crate::http::ApiError;

/// GET /api/rag/stats — index coverage of the live record set.
pub async fn stats_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (indexed, live, share) = state
        .pipeline
        .indexer()
        .coverage(state.pipeline.records())
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(serde_json::json!({
        "indexed_count": indexed,
        "database_count": live,
        "index_coverage": (share * 1000.0).round() / 10.0,
    })))
}

/// POST /api/rag/reindex — full re-upsert of every live record.
pub async fn reindex_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_auth(&state, &headers)?;
    let report = state
        .pipeline
        .indexer()
        .reconcile(state.pipeline.records())
        .await;
    Ok(Json(serde_json::to_value(report)?))
}
