use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::app::AppState;

/// GET /health — liveness plus degraded-mode flags.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "vita-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "ai_configured": state.gateway.is_configured(),
        "auth_configured": state.settings.login_password().is_some(),
    }))
}
