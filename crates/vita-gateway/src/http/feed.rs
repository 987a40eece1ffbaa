//! Ingestion endpoints: buffered and streaming feed, history, detail,
//! soft-delete, flag toggles and phase regeneration.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use tracing::warn;

use vita_core::types::{Category, Phase};
use vita_pipeline::ingest::{FeedInput, FeedOutcome};
use vita_pipeline::ProgressEvent;
use vita_store::types::HistoryQuery;

use crate::app::AppState;
use crate::auth::require_auth;
use crate::http::ApiError;

/// Parse the multipart form `{text?, image?, category_hint?, client_time?}`.
async fn read_feed_input(mut multipart: Multipart) -> Result<FeedInput, ApiError> {
    let mut input = FeedInput::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("multipart error: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "text" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                if !text.trim().is_empty() {
                    input.text = Some(text);
                }
            }
            "image" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                if !bytes.is_empty() {
                    input.image_bytes = Some(bytes.to_vec());
                }
            }
            "category_hint" => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                if !raw.trim().is_empty() {
                    input.category_hint = Some(
                        raw.parse::<Category>()
                            .map_err(ApiError::bad_request)?,
                    );
                }
            }
            "client_time" => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                if !raw.trim().is_empty() {
                    input.client_time = Some(raw);
                }
            }
            other => warn!(field = %other, "ignoring unknown multipart field"),
        }
    }
    Ok(input)
}

/// POST /api/feed — buffered ingestion.
pub async fn feed_handler(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<FeedOutcome>, ApiError> {
    let input = read_feed_input(multipart).await?;
    let outcome = state.pipeline.run(input).await?;
    Ok(Json(outcome))
}

/// POST /api/feed/stream — same inputs, SSE progress + terminal result.
pub async fn feed_stream_handler(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let input = read_feed_input(multipart).await?;
    // Validation happens here, before the stream response is committed.
    let mut rx = state.pipeline.run_streaming(input)?;

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let data = serde_json::to_string(&event).unwrap_or_else(|_| {
                "{\"type\":\"error\",\"message\":\"serialization failed\"}".to_string()
            });
            let terminal = matches!(
                event,
                ProgressEvent::Result { .. } | ProgressEvent::Error { .. }
            );
            yield Ok::<Event, Infallible>(Event::default().data(data));
            if terminal {
                break;
            }
        }
    };

    Ok((
        sse_headers(),
        Sse::new(stream).keep_alive(KeepAlive::default()),
    ))
}

/// Headers that keep proxies from buffering the event stream.
pub fn sse_headers() -> [(&'static str, &'static str); 3] {
    [
        ("Cache-Control", "no-cache"),
        ("Connection", "keep-alive"),
        ("X-Accel-Buffering", "no"),
    ]
}

#[derive(Deserialize)]
pub struct HistoryParams {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub category: Option<String>,
}

/// GET /api/feed/history — paged listing, soft-deleted excluded.
pub async fn history_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let category = match params.category.as_deref() {
        Some(raw) if !raw.is_empty() => {
            Some(raw.parse::<Category>().map_err(ApiError::bad_request)?)
        }
        _ => None,
    };
    let query = HistoryQuery {
        limit: params.limit.unwrap_or(50).min(200),
        offset: params.offset.unwrap_or(0),
        category,
    };
    let records = state.records.list(&query)?;
    let items: Vec<FeedOutcome> = records.iter().map(FeedOutcome::from_record).collect();
    Ok(Json(serde_json::json!({
        "items": items,
        "limit": query.limit,
        "offset": query.offset,
    })))
}

/// GET /api/feed/{id}
pub async fn detail_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<FeedOutcome>, ApiError> {
    let record = state
        .records
        .get(&id)?
        .ok_or_else(|| ApiError::not_found(format!("record {id}")))?;
    Ok(Json(FeedOutcome::from_record(&record)))
}

/// DELETE /api/feed/{id} — soft delete plus best-effort vector removal.
pub async fn delete_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_auth(&state, &headers)?;
    state.records.soft_delete(&id)?;
    state.pipeline.indexer().remove(&id).await;
    Ok(Json(serde_json::json!({"success": true})))
}

/// GET /api/feed/export — full dump including soft-deleted rows. The one
/// read that sees deleted records; admin only.
pub async fn export_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_auth(&state, &headers)?;
    let records = state.records.export_all()?;
    let items: Vec<serde_json::Value> = records
        .iter()
        .map(|r| {
            let mut item = serde_json::to_value(FeedOutcome::from_record(r)).unwrap_or_default();
            item["is_deleted"] = serde_json::json!(r.is_deleted);
            item["is_public"] = serde_json::json!(r.is_public);
            item["is_bookmarked"] = serde_json::json!(r.is_bookmarked);
            item
        })
        .collect();
    Ok(Json(serde_json::json!({"count": items.len(), "items": items})))
}

#[derive(Deserialize)]
pub struct RegenerateRequest {
    pub phases: Vec<String>,
}

/// POST /api/feed/{id}/regenerate
pub async fn regenerate_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<RegenerateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_auth(&state, &headers)?;
    let phases: Vec<Phase> = req
        .phases
        .iter()
        .map(|p| p.parse::<Phase>())
        .collect::<Result<_, _>>()
        .map_err(ApiError::bad_request)?;
    let outcome = state.pipeline.regenerate(&id, &phases).await?;
    Ok(Json(serde_json::to_value(outcome)?))
}

#[derive(Deserialize)]
pub struct VisibilityRequest {
    pub is_public: bool,
}

/// PATCH /api/feed/{id}/visibility
pub async fn visibility_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<VisibilityRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_auth(&state, &headers)?;
    state.records.set_public(&id, req.is_public)?;
    Ok(Json(serde_json::json!({"id": id, "is_public": req.is_public})))
}

#[derive(Deserialize)]
pub struct BookmarkRequest {
    pub is_bookmarked: bool,
}

/// PATCH /api/feed/{id}/bookmark
pub async fn bookmark_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<BookmarkRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_auth(&state, &headers)?;
    state.records.set_bookmarked(&id, req.is_bookmarked)?;
    Ok(Json(
        serde_json::json!({"id": id, "is_bookmarked": req.is_bookmarked}),
    ))
}
