//! Streaming conversational QA over the user's own data.
//!
//! Ordering contract: the user message is persisted strictly before the
//! first token is requested; the assistant message is persisted strictly
//! after the stream ends, success or abort. Whatever accumulated by the time
//! a stream dies is still written — only a zero-length accumulation is
//! dropped.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use vita_ai::gateway::{CallOptions, ChatMessage};
use vita_ai::{AiGateway, StreamEvent};
use vita_core::time::now_beijing;
use vita_rag::VectorIndexer;
use vita_store::types::ChatConversation;
use vita_store::{ChatStore, RecordStore};

use crate::chat::context;
use crate::error::{PipelineError, Result};

/// Replay at most this many prior messages (3 user+assistant pairs).
const HISTORY_MESSAGES: usize = 6;
/// Each replayed message is clipped to this many characters.
const HISTORY_CHAR_LIMIT: usize = 300;

/// Frames delivered to the SSE layer.
#[derive(Debug, Clone)]
pub enum ChatFrame {
    /// One token delta: `{"content": …, "done": false}` on the wire.
    Delta(String),
    /// Clean end of stream: `{"content": "", "done": true}`.
    Done,
    /// Terminal failure: `{"content": "generation failed: …", "done": true}`.
    Failed(String),
}

/// A started stream: the pre-stream metadata plus the frame receiver.
pub struct ChatStreamHandle {
    pub conversation_id: String,
    pub is_new: bool,
    pub title: String,
    pub frames: mpsc::Receiver<ChatFrame>,
}

pub struct ChatService {
    chat: Arc<ChatStore>,
    records: Arc<RecordStore>,
    indexer: Arc<VectorIndexer>,
    gateway: Arc<AiGateway>,
}

impl ChatService {
    pub fn new(
        chat: Arc<ChatStore>,
        records: Arc<RecordStore>,
        indexer: Arc<VectorIndexer>,
        gateway: Arc<AiGateway>,
    ) -> Self {
        Self {
            chat,
            records,
            indexer,
            gateway,
        }
    }

    pub fn conversations(&self) -> &Arc<ChatStore> {
        &self.chat
    }

    /// Start a streaming exchange. Creates the conversation when no id was
    /// supplied, persists the user turn, then spawns the producer.
    pub async fn stream_message(
        &self,
        message: &str,
        conversation_id: Option<&str>,
    ) -> Result<ChatStreamHandle> {
        let message = message.trim();
        if message.is_empty() {
            return Err(PipelineError::BadInput("message cannot be empty".into()));
        }

        let now = now_beijing();
        let (conversation, is_new) = self.resolve_conversation(message, conversation_id, now)?;

        // Replay window is read before the current turn is appended so the
        // prompt does not quote the message back at the model.
        let history = self
            .chat
            .recent_messages(&conversation.id, HISTORY_MESSAGES)
            .unwrap_or_default();

        // User turn lands before any token is requested.
        self.chat
            .append_message(&conversation.id, "user", message, now)?;

        let (frame_tx, frame_rx) = mpsc::channel::<ChatFrame>(64);
        let producer = StreamProducer {
            chat: Arc::clone(&self.chat),
            records: Arc::clone(&self.records),
            indexer: Arc::clone(&self.indexer),
            gateway: Arc::clone(&self.gateway),
            conversation_id: conversation.id.clone(),
            message: message.to_string(),
            history: history
                .into_iter()
                .map(|m| (m.role, context::truncate_chars(&m.content, HISTORY_CHAR_LIMIT)))
                .collect(),
        };
        tokio::spawn(async move { producer.run(frame_tx).await });

        Ok(ChatStreamHandle {
            conversation_id: conversation.id,
            is_new,
            title: conversation.title,
            frames: frame_rx,
        })
    }

    /// Non-streaming variant for legacy clients: inline history, single
    /// completion, nothing persisted.
    pub async fn chat_once(
        &self,
        message: &str,
        history: &[(String, String)],
    ) -> Result<String> {
        let message = message.trim();
        if message.is_empty() {
            return Err(PipelineError::BadInput("message cannot be empty".into()));
        }
        let now = now_beijing();
        let db_ctx = context::gather_db_context(&self.records, message, now);
        if !self.gateway.is_configured() {
            return Ok(no_ai_fallback(&db_ctx));
        }
        let rag_ctx = context::gather_rag_context(&self.indexer, message).await;

        let mut messages = vec![ChatMessage::system(context::build_system_prompt(now))];
        for (role, content) in history.iter().rev().take(HISTORY_MESSAGES).rev() {
            let content = context::truncate_chars(content, HISTORY_CHAR_LIMIT);
            messages.push(match role.as_str() {
                "assistant" => ChatMessage::assistant(content),
                _ => ChatMessage::user(content),
            });
        }
        let has_history = !history.is_empty();
        messages.push(ChatMessage::user(context::build_user_prompt(
            message,
            &db_ctx,
            &rag_ctx,
            has_history,
        )));

        let opts = CallOptions::task("chat").model(self.gateway.roster().smart.clone());
        match self.gateway.chat_complete(messages, opts).await {
            Ok(done) if !done.content.trim().is_empty() => Ok(done.content),
            Ok(_) => Ok(db_only_fallback(&db_ctx)),
            Err(e) => {
                warn!(error = %e, "chat completion failed, degrading to data-only reply");
                Ok(db_only_fallback(&db_ctx))
            }
        }
    }

    fn resolve_conversation(
        &self,
        message: &str,
        conversation_id: Option<&str>,
        now: chrono::NaiveDateTime,
    ) -> Result<(ChatConversation, bool)> {
        match conversation_id {
            Some(id) => {
                let conversation = self
                    .chat
                    .get_conversation(id)?
                    .ok_or_else(|| PipelineError::NotFound(format!("conversation {id}")))?;
                Ok((conversation, false))
            }
            None => {
                let conversation = self.chat.create_conversation(message, now)?;
                Ok((conversation, true))
            }
        }
    }
}

/// Owns everything the stream needs so its deferred persistence cannot
/// depend on the request's lifetime.
struct StreamProducer {
    chat: Arc<ChatStore>,
    records: Arc<RecordStore>,
    indexer: Arc<VectorIndexer>,
    gateway: Arc<AiGateway>,
    conversation_id: String,
    message: String,
    history: Vec<(String, String)>,
}

impl StreamProducer {
    async fn run(self, frames: mpsc::Sender<ChatFrame>) {
        let now = now_beijing();
        let db_ctx = context::gather_db_context(&self.records, &self.message, now);

        if !self.gateway.is_configured() {
            // Degraded mode still answers and still persists the reply.
            let reply = no_ai_fallback(&db_ctx);
            let _ = frames.send(ChatFrame::Delta(reply.clone())).await;
            let _ = frames.send(ChatFrame::Done).await;
            self.persist_assistant(&reply);
            return;
        }

        let rag_ctx = context::gather_rag_context(&self.indexer, &self.message).await;
        let mut messages = vec![ChatMessage::system(context::build_system_prompt(now))];
        for (role, content) in &self.history {
            messages.push(match role.as_str() {
                "assistant" => ChatMessage::assistant(content.clone()),
                _ => ChatMessage::user(content.clone()),
            });
        }
        let has_history = !self.history.is_empty();
        messages.push(ChatMessage::user(context::build_user_prompt(
            &self.message,
            &db_ctx,
            &rag_ctx,
            has_history,
        )));

        let (event_tx, mut event_rx) = mpsc::channel::<StreamEvent>(64);
        let gateway = Arc::clone(&self.gateway);
        let opts = CallOptions::task("chat").model(gateway.roster().smart.clone());
        let stream_task =
            tokio::spawn(async move { gateway.chat_stream(messages, opts, event_tx).await });

        let mut accumulated = String::new();
        let mut failed: Option<String> = None;
        while let Some(event) = event_rx.recv().await {
            match event {
                StreamEvent::TextDelta { text } => {
                    accumulated.push_str(&text);
                    // A dropped consumer stops delivery, never accumulation.
                    let _ = frames.send(ChatFrame::Delta(text)).await;
                }
                StreamEvent::Done { .. } => {}
                StreamEvent::Error { message } => failed = Some(message),
            }
        }
        match stream_task.await {
            Ok(Ok(_model)) => {}
            Ok(Err(e)) => failed = Some(e.to_string()),
            Err(join) => failed = Some(join.to_string()),
        }

        // Deferred persistence runs regardless of how the stream ended.
        self.persist_assistant(&accumulated);

        match failed {
            Some(message) => {
                warn!(error = %message, "chat stream ended with failure");
                let _ = frames.send(ChatFrame::Failed(message)).await;
            }
            None => {
                let _ = frames.send(ChatFrame::Done).await;
            }
        }
    }

    fn persist_assistant(&self, content: &str) {
        if content.is_empty() {
            return;
        }
        match self
            .chat
            .append_message(&self.conversation_id, "assistant", content, now_beijing())
        {
            Ok(_) => info!(
                conversation = %self.conversation_id,
                chars = content.chars().count(),
                "assistant turn persisted"
            ),
            Err(e) => warn!(error = %e, "assistant persistence failed"),
        }
    }
}

fn no_ai_fallback(db_ctx: &str) -> String {
    format!(
        "⚠️ The AI service is not configured; here is the raw data instead:\n\n```\n{db_ctx}\n```"
    )
}

fn db_only_fallback(db_ctx: &str) -> String {
    format!(
        "The AI analysis is temporarily unavailable; here is what the data says:\n\n```\n{db_ctx}\n```\n\nPlease try again shortly."
    )
}
