use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use vita_store::settings::NICKNAME_KEY;

use crate::app::AppState;
use crate::auth::require_auth;
use crate::http::ApiError;

/// GET /api/settings/nickname
pub async fn get_nickname_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let nickname = state.app_settings.nickname().map_err(ApiError::from)?;
    Ok(Json(serde_json::json!({"nickname": nickname})))
}

#[derive(Deserialize)]
pub struct NicknameRequest {
    pub nickname: String,
}

/// PUT /api/settings/nickname
pub async fn set_nickname_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<NicknameRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_auth(&state, &headers)?;
    let nickname: String = req.nickname.trim().chars().take(40).collect();
    state.app_settings.set(NICKNAME_KEY, &nickname)?;
    Ok(Json(serde_json::json!({"nickname": nickname})))
}
