//! Single entry point for all LLM, vision and embedding calls.
//!
//! Three orthogonal layers, kept separate on purpose:
//! 1. acquire-with-upgrade returns the concrete model (limiter),
//! 2. one attempt runs the HTTP call and writes a ledger row,
//! 3. the retry loop wraps attempts with classification, backoff and the
//!    premium→flash fallback.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

use vita_core::config::Settings;
use vita_core::time::now_beijing;
use vita_store::UsageLedger;

use crate::error::AiError;
use crate::json_repair::extract_json;
use crate::limiter::ModelLimiter;
use crate::provider::{vision_content, ChatOutcall, ChatProvider, OpenAiCompatProvider, Usage};
use crate::stream::StreamEvent;

const MAX_RETRIES: u32 = 3;
/// Extra attempts covering the fallback leg after a model switch.
const EXTRA_FALLBACK_ATTEMPTS: u32 = 2;
const BASE_DELAY: Duration = Duration::from_secs(1);
const RATE_LIMIT_BASE_DELAY: Duration = Duration::from_secs(5);
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Exponential backoff with a hard cap; rate limits wait harder.
fn backoff_delay(attempt: u32, rate_limited: bool) -> Duration {
    let base = if rate_limited {
        RATE_LIMIT_BASE_DELAY
    } else {
        BASE_DELAY
    };
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    base.saturating_mul(factor).min(MAX_DELAY)
}

/// Logical model roster resolved from configuration.
#[derive(Debug, Clone)]
pub struct ModelRoster {
    pub vision: String,
    pub vision_flash: String,
    pub text: String,
    pub text_flash: String,
    pub smart: String,
    pub embedding: String,
}

impl ModelRoster {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            vision: settings.vision_model.clone(),
            vision_flash: settings.simple_vision_model.clone(),
            text: settings.text_model.clone(),
            text_flash: settings.simple_text_model.clone(),
            smart: settings.smart_model.clone(),
            embedding: settings.embedding_model.clone(),
        }
    }

    /// Cheaper model of the same family, used after repeated failures.
    pub fn fallback_of(&self, model: &str) -> Option<&str> {
        if model == self.vision {
            Some(&self.vision_flash)
        } else if model == self.text || model == self.smart {
            Some(&self.text_flash)
        } else {
            None
        }
    }
}

/// Message constructors for the raw wire shape.
pub struct ChatMessage;

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Value {
        serde_json::json!({"role": "system", "content": content.into()})
    }

    pub fn user(content: impl Into<String>) -> Value {
        serde_json::json!({"role": "user", "content": content.into()})
    }

    pub fn assistant(content: impl Into<String>) -> Value {
        serde_json::json!({"role": "assistant", "content": content.into()})
    }

    /// User turn carrying structured content blocks (vision).
    pub fn user_blocks(blocks: Value) -> Value {
        serde_json::json!({"role": "user", "content": blocks})
    }
}

/// Options for a single logical gateway call.
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub json_response: bool,
    pub allow_fallback: bool,
    pub task_tag: String,
    pub task_description: Option<String>,
    pub record_id: Option<String>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 4000,
            temperature: 0.7,
            json_response: false,
            allow_fallback: true,
            task_tag: "chat".to_string(),
            task_description: None,
            record_id: None,
        }
    }
}

impl CallOptions {
    pub fn task(tag: &str) -> Self {
        Self {
            task_tag: tag.to_string(),
            ..Default::default()
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn json(mut self) -> Self {
        self.json_response = true;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn record(mut self, record_id: &str) -> Self {
        self.record_id = Some(record_id.to_string());
        self
    }

    pub fn description(mut self, d: impl Into<String>) -> Self {
        self.task_description = Some(d.into());
        self
    }

    pub fn no_fallback(mut self) -> Self {
        self.allow_fallback = false;
        self
    }
}

/// Result of a completed gateway call. `model` is the concrete model that
/// actually served the final attempt — it may differ from the request.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    /// Parsed value when the call ran in JSON mode.
    pub json: Option<Value>,
    pub model: String,
    pub usage: Usage,
}

#[derive(Clone, Copy)]
enum CallKind<'a> {
    Chat(&'a ChatOutcall),
    Embed(&'a str),
}

enum CallOutput {
    Chat(crate::provider::ChatReply),
    Embed(Vec<f32>, Option<Usage>),
}

pub struct AiGateway {
    provider: Option<Arc<dyn ChatProvider>>,
    limiter: ModelLimiter,
    roster: ModelRoster,
    ledger: Option<Arc<UsageLedger>>,
}

impl AiGateway {
    pub fn new(
        provider: Option<Arc<dyn ChatProvider>>,
        roster: ModelRoster,
        ledger: Option<Arc<UsageLedger>>,
    ) -> Self {
        let mut limiter = ModelLimiter::new();
        limiter.add_upgrade(&roster.vision_flash, &roster.vision);
        limiter.add_upgrade(&roster.text_flash, &roster.text);
        Self {
            provider,
            limiter,
            roster,
            ledger,
        }
    }

    pub fn from_settings(settings: &Settings, ledger: Option<Arc<UsageLedger>>) -> Self {
        let roster = ModelRoster::from_settings(settings);
        let key = settings.ai_api_key();
        let provider: Option<Arc<dyn ChatProvider>> = if key.is_empty() {
            None
        } else {
            Some(Arc::new(OpenAiCompatProvider::new(
                settings.ai_provider.clone(),
                key.to_string(),
                settings.ai_base_url().to_string(),
            )))
        };
        Self::new(provider, roster, ledger)
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    pub fn roster(&self) -> &ModelRoster {
        &self.roster
    }

    /// Chat completion with concurrency control, retry, fallback and usage
    /// accounting. Defaults to the flash text model.
    pub async fn chat_complete(
        &self,
        messages: Vec<Value>,
        opts: CallOptions,
    ) -> Result<Completion, AiError> {
        let model = opts
            .model
            .clone()
            .unwrap_or_else(|| self.roster.text_flash.clone());
        let req = ChatOutcall {
            messages,
            max_tokens: opts.max_tokens,
            temperature: opts.temperature,
            json_response: opts.json_response,
        };
        let (output, actual) = self
            .execute_with_retry(model, CallKind::Chat(&req), &opts)
            .await?;
        let CallOutput::Chat(reply) = output else {
            return Err(AiError::Parse("unexpected embed output for chat call".into()));
        };
        let json = if opts.json_response {
            Some(extract_json(&reply.content, &actual)?)
        } else {
            None
        };
        Ok(Completion {
            content: reply.content,
            json,
            model: actual,
            usage: reply.usage.unwrap_or_default(),
        })
    }

    /// Vision completion: one user turn of prompt + inline image. Defaults
    /// to the flash vision model.
    pub async fn vision_complete(
        &self,
        prompt: &str,
        image_base64: &str,
        opts: CallOptions,
    ) -> Result<Completion, AiError> {
        let opts = CallOptions {
            model: Some(
                opts.model
                    .clone()
                    .unwrap_or_else(|| self.roster.vision_flash.clone()),
            ),
            ..opts
        };
        let messages = vec![ChatMessage::user_blocks(vision_content(
            prompt,
            image_base64,
            "high",
        ))];
        self.chat_complete(messages, opts).await
    }

    /// Embedding lookup. No fallback tier exists for embedding models.
    pub async fn embed(&self, text: &str, model: Option<&str>) -> Result<Vec<f32>, AiError> {
        let model = model.unwrap_or(&self.roster.embedding).to_string();
        let opts = CallOptions::task("embedding").no_fallback();
        let (output, _actual) = self
            .execute_with_retry(model, CallKind::Embed(text), &opts)
            .await?;
        match output {
            CallOutput::Embed(vector, _) => Ok(vector),
            CallOutput::Chat(_) => Err(AiError::Parse("unexpected chat output for embed".into())),
        }
    }

    /// Streaming chat completion. Single attempt — a broken stream is the
    /// caller's mid-generation problem, not something a silent retry can
    /// paper over. The permit is held until the provider stream ends and the
    /// final usage block is written to the ledger.
    ///
    /// Returns the concrete model once the stream has finished.
    pub async fn chat_stream(
        &self,
        messages: Vec<Value>,
        opts: CallOptions,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<String, AiError> {
        let provider = self.provider.clone().ok_or(AiError::NotConfigured)?;
        let model = opts
            .model
            .clone()
            .unwrap_or_else(|| self.roster.smart.clone());
        let acquired = self.limiter.acquire_with_upgrade(&model).await?;
        let actual = acquired.model.clone();
        let req = ChatOutcall {
            messages,
            max_tokens: opts.max_tokens,
            temperature: opts.temperature,
            json_response: false,
        };

        let (inner_tx, mut inner_rx) = mpsc::channel::<StreamEvent>(64);
        let stream_model = actual.clone();
        let handle = tokio::spawn(async move {
            // Permit rides inside the task so it outlives this function's
            // frame and drops exactly when the upstream stream ends.
            let _permit = acquired;
            provider.chat_stream(&stream_model, &req, inner_tx).await
        });

        let mut receiver_gone = false;
        while let Some(event) = inner_rx.recv().await {
            if let StreamEvent::Done {
                prompt_tokens,
                completion_tokens,
                ..
            } = &event
            {
                self.record_usage(&actual, *prompt_tokens, *completion_tokens, &opts, None);
            }
            if !receiver_gone && tx.send(event).await.is_err() {
                // Client went away; keep draining so usage still lands.
                receiver_gone = true;
            }
        }

        match handle.await {
            Ok(Ok(())) => Ok(actual),
            Ok(Err(e)) => Err(e),
            Err(join) => Err(AiError::Unretryable(format!("stream task failed: {join}"))),
        }
    }

    async fn execute_with_retry(
        &self,
        model: String,
        call: CallKind<'_>,
        opts: &CallOptions,
    ) -> Result<(CallOutput, String), AiError> {
        let provider = self.provider.clone().ok_or(AiError::NotConfigured)?;
        let max_total_attempts = MAX_RETRIES + EXTRA_FALLBACK_ATTEMPTS;
        let mut requested = model;
        let mut attempts = 0u32;
        let mut has_fallen_back = false;
        let mut last_error = String::new();

        loop {
            // Re-enters the acquire-with-upgrade protocol on every attempt;
            // a retry may run on a different concrete model than the first.
            let acquired = self.limiter.acquire_with_upgrade(&requested).await?;
            let actual = acquired.model.clone();

            let result = match call {
                CallKind::Chat(req) => provider
                    .chat(&actual, req)
                    .await
                    .map(CallOutput::Chat),
                CallKind::Embed(text) => provider
                    .embed(&actual, text)
                    .await
                    .map(|(v, u)| CallOutput::Embed(v, u)),
            };
            drop(acquired);

            match result {
                Ok(output) => {
                    let usage = match &output {
                        CallOutput::Chat(reply) => reply.usage,
                        CallOutput::Embed(_, usage) => *usage,
                    };
                    if let Some(u) = usage {
                        self.record_usage(
                            &actual,
                            u.prompt_tokens,
                            u.completion_tokens,
                            opts,
                            None,
                        );
                    }
                    return Ok((output, actual));
                }
                Err(e) => {
                    attempts += 1;
                    warn!(
                        attempt = attempts,
                        max = max_total_attempts,
                        model = %actual,
                        error = %e,
                        "AI call failed"
                    );
                    // Failed attempts are visible in the ledger too, with
                    // zero tokens and the error class in the description.
                    self.record_usage(&actual, 0, 0, opts, Some(&e));

                    if !e.is_retryable() {
                        return Err(AiError::Unretryable(e.to_string()));
                    }
                    let delay = backoff_delay(attempts, e.is_rate_limit());
                    last_error = e.to_string();

                    if attempts >= 2 && opts.allow_fallback && !has_fallen_back {
                        if let Some(fallback) = self.roster.fallback_of(&requested) {
                            if fallback != requested {
                                info!(from = %requested, to = %fallback, "falling back to cheaper model");
                                requested = fallback.to_string();
                                has_fallen_back = true;
                                continue;
                            }
                        }
                    }

                    if attempts >= max_total_attempts {
                        break;
                    }
                    info!(delay_s = delay.as_secs_f64(), "backing off before retry");
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(AiError::MaxRetriesExceeded {
            attempts,
            last: last_error,
        })
    }

    fn record_usage(
        &self,
        model: &str,
        prompt_tokens: u32,
        completion_tokens: u32,
        opts: &CallOptions,
        error: Option<&AiError>,
    ) {
        let Some(ledger) = &self.ledger else {
            return;
        };
        let description = match error {
            Some(e) => Some(format!(
                "attempt failed: {}",
                e.to_string().chars().take(120).collect::<String>()
            )),
            None => opts.task_description.clone(),
        };
        if let Err(e) = ledger.record(
            model,
            prompt_tokens,
            completion_tokens,
            &opts.task_tag,
            description.as_deref(),
            opts.record_id.as_deref(),
            now_beijing(),
        ) {
            warn!(error = %e, "usage ledger write failed");
        }
    }
}
