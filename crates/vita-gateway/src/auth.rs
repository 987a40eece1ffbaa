//! Password login issuing opaque expiring bearer tokens, held in an
//! in-process map. Mutating endpoints call [`require_auth`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::AppState;
use crate::http::ApiError;

/// Opaque token → expiry instant.
pub struct TokenStore {
    tokens: DashMap<String, Instant>,
    ttl: Duration,
}

impl TokenStore {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            tokens: DashMap::new(),
            ttl: Duration::from_secs(ttl_seconds),
        }
    }

    pub fn issue(&self) -> String {
        let token = format!(
            "{}{}",
            Uuid::new_v4().simple(),
            Uuid::new_v4().simple()
        );
        self.tokens.insert(token.clone(), Instant::now() + self.ttl);
        token
    }

    pub fn is_valid(&self, token: &str) -> bool {
        // Read the expiry and release the shard guard before any removal.
        let expired = match self.tokens.get(token) {
            Some(expiry) => *expiry <= Instant::now(),
            None => return false,
        };
        if expired {
            self.tokens.remove(token);
            return false;
        }
        true
    }

    pub fn revoke(&self, token: &str) {
        self.tokens.remove(token);
    }
}

pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v))
}

/// Guard for mutating endpoints.
pub fn require_auth(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let token = extract_bearer(headers)
        .ok_or_else(|| ApiError::unauthorized("missing Authorization header"))?;
    if state.tokens.is_valid(token) {
        Ok(())
    } else {
        Err(ApiError::unauthorized("invalid or expired token"))
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let expected = state
        .settings
        .login_password()
        .ok_or_else(|| ApiError::unauthorized("no admin password configured"))?;
    if req.password != expected {
        return Err(ApiError::unauthorized("wrong password"));
    }
    let token = state.tokens.issue();
    Ok(Json(LoginResponse {
        success: true,
        token: Some(token),
    }))
}

pub async fn verify_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TokenRequest>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({"valid": state.tokens.is_valid(&req.token)}))
}

pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TokenRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    state.tokens.revoke(&req.token);
    (StatusCode::OK, Json(serde_json::json!({"success": true})))
}
