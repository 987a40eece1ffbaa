use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Duration;
use serde::Deserialize;

use vita_core::time::now_beijing;

use crate::app::AppState;
use crate::auth::require_auth;
use crate::http::ApiError;

#[derive(Deserialize)]
pub struct StatsParams {
    /// Trailing window in days; absent means all time.
    #[serde(default)]
    pub days: Option<i64>,
}

/// GET /api/tokens/stats
pub async fn stats_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<StatsParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_auth(&state, &headers)?;
    let since = params.days.map(|d| now_beijing() - Duration::days(d));
    let stats = state.ledger.stats(since)?;
    Ok(Json(serde_json::to_value(stats)?))
}

#[derive(Deserialize)]
pub struct RecentParams {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// GET /api/tokens/recent
pub async fn recent_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<RecentParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_auth(&state, &headers)?;
    let rows = state.ledger.recent(params.limit.unwrap_or(20).min(200))?;
    Ok(Json(serde_json::json!({"records": rows})))
}
