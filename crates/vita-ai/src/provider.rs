use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::AiError;
use crate::stream::{parse_sse_line, SseParsed, StreamEvent};

/// Token accounting returned by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A completed (non-streaming) chat reply.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub content: String,
    pub usage: Option<Usage>,
}

/// One upstream request, minus the model — the caller owns model selection
/// because retries may re-route to a different concrete model.
#[derive(Debug, Clone)]
pub struct ChatOutcall {
    /// Raw chat messages (`{"role": …, "content": …}`); content may be a
    /// string or an array of content blocks (vision).
    pub messages: Vec<serde_json::Value>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Ask the provider for its JSON response mode.
    pub json_response: bool,
}

impl ChatOutcall {
    pub fn new(messages: Vec<serde_json::Value>) -> Self {
        Self {
            messages,
            max_tokens: 4000,
            temperature: 0.7,
            json_response: false,
        }
    }

    pub fn json(mut self) -> Self {
        self.json_response = true;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Wire transport to an LLM endpoint. The gateway drives this through its
/// concurrency / retry / fallback layers; tests inject scripted fakes.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn chat(&self, model: &str, req: &ChatOutcall) -> Result<ChatReply, AiError>;

    /// Stream deltas into `tx`; the final event is `Done` (with usage when
    /// the provider reports it) or `Error`.
    async fn chat_stream(
        &self,
        model: &str,
        req: &ChatOutcall,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), AiError>;

    async fn embed(&self, model: &str, text: &str) -> Result<(Vec<f32>, Option<Usage>), AiError>;
}

/// OpenAI-compatible HTTP provider. Works against api.openai.com and the
/// GLM open platform alike; only base URL and key differ.
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    provider_name: String,
}

impl OpenAiCompatProvider {
    pub fn new(name: impl Into<String>, api_key: String, base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            provider_name: name.into(),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn embeddings_url(&self) -> String {
        format!("{}/v1/embeddings", self.base_url)
    }

    fn build_body(&self, model: &str, req: &ChatOutcall, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": model,
            "messages": req.messages,
            "max_tokens": req.max_tokens,
            "temperature": req.temperature,
            "stream": stream,
        });
        if req.json_response {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        body
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, AiError> {
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "provider API error");
            return Err(AiError::Api {
                status,
                message: text,
            });
        }
        Ok(resp)
    }
}

/// Build a user content-block pair for a vision request: the prompt text plus
/// an inline data-URL image.
pub fn vision_content(prompt: &str, image_base64: &str, detail: &str) -> serde_json::Value {
    serde_json::json!([
        {"type": "text", "text": prompt},
        {
            "type": "image_url",
            "image_url": {
                "url": format!("data:image/jpeg;base64,{image_base64}"),
                "detail": detail,
            }
        }
    ])
}

#[async_trait]
impl ChatProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    async fn chat(&self, model: &str, req: &ChatOutcall) -> Result<ChatReply, AiError> {
        debug!(model, "sending chat completion");
        let resp = self
            .client
            .post(self.chat_url())
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&self.build_body(model, req, false))
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;

        let api: ApiResponse = resp
            .json()
            .await
            .map_err(|e| AiError::Parse(e.to_string()))?;
        let content = api
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        Ok(ChatReply {
            content,
            usage: api.usage.map(Into::into),
        })
    }

    async fn chat_stream(
        &self,
        model: &str,
        req: &ChatOutcall,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), AiError> {
        use futures_util::StreamExt;

        debug!(model, "sending streaming chat completion");
        let resp = self
            .client
            .post(self.chat_url())
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&self.build_body(model, req, true))
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;

        let mut usage = Usage::default();
        let mut line_buf = String::new();
        let mut byte_stream = resp.bytes_stream();

        'outer: while let Some(chunk) = byte_stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    let _ = tx
                        .send(StreamEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                    return Ok(());
                }
            };
            let Ok(text) = std::str::from_utf8(&chunk) else {
                continue;
            };
            line_buf.push_str(text);

            // Consume complete lines; the tail stays buffered for the next
            // chunk so multi-byte frames split across reads survive.
            while let Some(pos) = line_buf.find('\n') {
                let line: String = line_buf.drain(..=pos).collect();
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let Some(SseParsed::Data(data)) = parse_sse_line(line) else {
                    continue;
                };
                if data.trim() == "[DONE]" {
                    break 'outer;
                }
                let Ok(frame) = serde_json::from_str::<StreamChunk>(&data) else {
                    continue;
                };
                if let Some(u) = frame.usage {
                    usage = u.into();
                }
                for choice in frame.choices {
                    if let Some(content) = choice.delta.content {
                        if !content.is_empty()
                            && tx
                                .send(StreamEvent::TextDelta { text: content })
                                .await
                                .is_err()
                        {
                            // Receiver dropped; stop pulling tokens.
                            return Ok(());
                        }
                    }
                }
            }
        }

        let _ = tx
            .send(StreamEvent::Done {
                model: model.to_string(),
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            })
            .await;
        Ok(())
    }

    async fn embed(&self, model: &str, text: &str) -> Result<(Vec<f32>, Option<Usage>), AiError> {
        debug!(model, "sending embedding request");
        let body = serde_json::json!({"model": model, "input": text});
        let resp = self
            .client
            .post(self.embeddings_url())
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;
        let resp = Self::check_status(resp).await?;

        let api: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| AiError::Parse(e.to_string()))?;
        let vector = api
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| AiError::Parse("embedding response had no vectors".into()))?;
        Ok((vector, api.usage.map(Into::into)))
    }
}

// Provider wire types.

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        let total = if u.total_tokens > 0 {
            u.total_tokens
        } else {
            u.prompt_tokens + u.completion_tokens
        };
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: total,
        }
    }
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_shape_includes_json_mode() {
        let provider = OpenAiCompatProvider::new("test", "k".into(), "https://x.test/".into());
        let req = ChatOutcall::new(vec![serde_json::json!({"role": "user", "content": "hi"})])
            .json()
            .max_tokens(256);
        let body = provider.build_body("glm-4.7", &req, true);
        assert_eq!(body["model"], "glm-4.7");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(provider.chat_url(), "https://x.test/v1/chat/completions");
    }

    #[test]
    fn vision_content_is_data_url() {
        let content = vision_content("what is this", "QUJD", "high");
        assert_eq!(content[0]["text"], "what is this");
        assert_eq!(
            content[1]["image_url"]["url"],
            "data:image/jpeg;base64,QUJD"
        );
        assert_eq!(content[1]["image_url"]["detail"], "high");
    }
}
