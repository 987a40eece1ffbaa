//! Chat endpoints: SSE streaming, legacy non-streaming, conversations CRUD.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use vita_core::time::now_beijing;
use vita_pipeline::chat::service::ChatFrame;

use crate::app::AppState;
use crate::http::feed::sse_headers;
use crate::http::ApiError;

#[derive(Deserialize)]
pub struct StreamRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// POST /api/chat/stream — SSE token stream.
///
/// Pre-stream event: `{conversation_id, is_new, title}`; then token frames
/// `{"content": …, "done": false}`; terminal frame has `done: true`.
pub async fn stream_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StreamRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut handle = state
        .chat
        .stream_message(&req.message, req.conversation_id.as_deref())
        .await?;

    let meta = serde_json::json!({
        "conversation_id": handle.conversation_id,
        "is_new": handle.is_new,
        "title": handle.title,
    });

    let stream = async_stream::stream! {
        yield Ok::<Event, Infallible>(Event::default().data(meta.to_string()));
        while let Some(frame) = handle.frames.recv().await {
            match frame {
                ChatFrame::Delta(token) => {
                    let data = serde_json::json!({"content": token, "done": false});
                    yield Ok(Event::default().data(data.to_string()));
                }
                ChatFrame::Done => {
                    let data = serde_json::json!({"content": "", "done": true});
                    yield Ok(Event::default().data(data.to_string()));
                    break;
                }
                ChatFrame::Failed(message) => {
                    let data = serde_json::json!({
                        "content": format!("generation failed: {message}"),
                        "done": true,
                    });
                    yield Ok(Event::default().data(data.to_string()));
                    break;
                }
            }
        }
    };

    Ok((
        sse_headers(),
        Sse::new(stream).keep_alive(KeepAlive::default()),
    ))
}

#[derive(Deserialize)]
pub struct MessageRequest {
    pub message: String,
    #[serde(default)]
    pub history: Option<Vec<HistoryItem>>,
}

#[derive(Deserialize)]
pub struct HistoryItem {
    pub role: String,
    pub content: String,
}

/// POST /api/chat/message — non-streaming variant for legacy clients.
pub async fn message_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MessageRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let history: Vec<(String, String)> = req
        .history
        .unwrap_or_default()
        .into_iter()
        .map(|h| (h.role, h.content))
        .collect();
    let content = state.chat.chat_once(&req.message, &history).await?;
    Ok(Json(serde_json::json!({
        "type": "markdown",
        "content": content,
    })))
}

/// GET /api/chat/suggestions — starter prompts for the chat UI.
pub async fn suggestions_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "suggestions": [
            {"text": "How was today?", "icon": "📊"},
            {"text": "Summarize my week", "icon": "📈"},
            {"text": "How is my state trending?", "icon": "📉"},
            {"text": "How is my sleep?", "icon": "😴"},
            {"text": "Give me some suggestions", "icon": "💡"},
            {"text": "Which was my best day?", "icon": "🏆"},
        ],
    }))
}

/// GET /api/chat/conversations
pub async fn list_conversations_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conversations = state.chat_store.list_conversations(100)?;
    Ok(Json(serde_json::json!({"conversations": conversations})))
}

#[derive(Deserialize)]
pub struct CreateConversationRequest {
    #[serde(default)]
    pub title: Option<String>,
}

/// POST /api/chat/conversations
pub async fn create_conversation_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let title = req.title.unwrap_or_default();
    let conversation = state.chat_store.create_conversation(&title, now_beijing())?;
    Ok(Json(serde_json::to_value(conversation)?))
}

/// GET /api/chat/conversations/{id} — metadata plus full message list.
pub async fn get_conversation_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conversation = state
        .chat_store
        .get_conversation(&id)?
        .ok_or_else(|| ApiError::not_found(format!("conversation {id}")))?;
    let messages = state.chat_store.list_messages(&id)?;
    Ok(Json(serde_json::json!({
        "conversation": conversation,
        "messages": messages,
    })))
}

#[derive(Deserialize)]
pub struct RenameRequest {
    pub title: String,
}

/// PATCH /api/chat/conversations/{id}
pub async fn rename_conversation_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<RenameRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .chat_store
        .rename_conversation(&id, &req.title, now_beijing())?;
    Ok(Json(serde_json::json!({"id": id, "title": req.title})))
}

/// DELETE /api/chat/conversations/{id}
pub async fn delete_conversation_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.chat_store.delete_conversation(&id)?;
    Ok(Json(serde_json::json!({"success": true})))
}
