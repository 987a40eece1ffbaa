use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use chrono::Duration;
use serde::Deserialize;

use vita_core::time::now_beijing;

use crate::app::AppState;
use crate::http::ApiError;

#[derive(Deserialize)]
pub struct TrendingParams {
    #[serde(default)]
    pub days: Option<i64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// GET /api/tags/trending — tag frequency over a trailing window.
pub async fn trending_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TrendingParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let days = params.days.unwrap_or(7).clamp(1, 365);
    let limit = params.limit.unwrap_or(10).min(50);
    let since = now_beijing() - Duration::days(days);
    let trending = state.records.trending_tags(since, limit)?;
    let items: Vec<serde_json::Value> = trending
        .into_iter()
        .map(|(tag, count)| serde_json::json!({"tag": tag, "count": count}))
        .collect();
    Ok(Json(serde_json::json!({"days": days, "tags": items})))
}
