//! Shared wiring for pipeline integration tests: in-memory stores, a
//! scripted provider behind the real gateway, and a deterministic embedder.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use vita_ai::provider::{ChatOutcall, ChatProvider, ChatReply, Usage};
use vita_ai::{AiError, AiGateway, StreamEvent};
use vita_ai::gateway::ModelRoster;
use vita_pipeline::{ChatService, ImageStorage, IngestPipeline};
use vita_rag::index::Embedder;
use vita_rag::{VectorIndexer, VectorStore};
use vita_store::{ChatStore, RecordStore, SettingsStore, UsageLedger};

/// Routes requests on prompt markers and answers with canned JSON. Set
/// `fail_extractions` to make every extraction attempt blow up.
pub struct FakeProvider {
    pub fail_extractions: bool,
    pub extract_calls: AtomicU32,
    pub chat_calls: AtomicU32,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self {
            fail_extractions: false,
            extract_calls: AtomicU32::new(0),
            chat_calls: AtomicU32::new(0),
        }
    }
}

impl FakeProvider {
    fn kind_of(req: &ChatOutcall) -> &'static str {
        let system = req
            .messages
            .first()
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or("");
        if system.contains("image triage") || (system.is_empty() && user_blocks_present(req)) {
            "classify"
        } else if system.contains("tag generator") {
            "tags"
        } else if system.contains("AI life assistant") {
            "chat"
        } else {
            "extract"
        }
    }
}

fn user_blocks_present(req: &ChatOutcall) -> bool {
    req.messages
        .iter()
        .any(|m| m.get("content").map(|c| c.is_array()).unwrap_or(false))
}

#[async_trait]
impl ChatProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn chat(&self, _model: &str, req: &ChatOutcall) -> Result<ChatReply, AiError> {
        let content = match Self::kind_of(req) {
            "classify" => serde_json::json!({
                "image_type": "screenshot",
                "should_save_image": false,
                "save_reason": null,
                "content_hint": "a screen-time screenshot",
                "confidence": 0.9,
                "category_suggestion": "SCREEN",
            })
            .to_string(),
            "tags" => serde_json::json!({
                "tags": ["#time/forenoon", "#activity/walk", "#mood/fresh"]
            })
            .to_string(),
            "chat" => {
                self.chat_calls.fetch_add(1, Ordering::SeqCst);
                "Your week looked balanced.".to_string()
            }
            _ => {
                self.extract_calls.fetch_add(1, Ordering::SeqCst);
                if self.fail_extractions {
                    return Err(AiError::Api {
                        status: 400,
                        message: "scripted extraction failure".into(),
                    });
                }
                if user_blocks_present(req) {
                    // Vision extraction: answer like the screen-time persona.
                    serde_json::json!({
                        "category": "SCREEN",
                        "total_screen_time": "5h32m",
                        "total_minutes": 332,
                        "top_apps": [
                            {"name": "WeChat", "time": "2h15m", "minutes": 135, "type": "social"},
                            {"name": "Bilibili", "time": "45m", "minutes": 45, "type": "entertainment"}
                        ],
                        "reply_text": "heavy social usage today",
                        "record_time": "today",
                        "analysis": "over five hours on screen, mostly social apps",
                        "suggestions": ["set an app limit"],
                        "dimension_scores": {
                            "body": 0, "mood": 40, "social": 0, "work": 20,
                            "growth": 0, "meaning": 0, "digital": 45, "leisure": 30
                        }
                    })
                    .to_string()
                } else {
                    serde_json::json!({
                        "category": "ACTIVITY",
                        "sub_categories": ["LEISURE"],
                        "reply_text": "a crisp five-kilometre walk",
                        "record_time": "today",
                        "note": "walked 5 km",
                        "analysis": "steady aerobic effort in the forenoon",
                        "suggestions": ["stretch afterwards"],
                        "dimension_scores": {
                            "body": 80, "mood": 65, "social": 0, "work": 0,
                            "growth": 10, "meaning": 30, "digital": 0, "leisure": 40
                        }
                    })
                    .to_string()
                }
            }
        };
        Ok(ChatReply {
            content,
            usage: Some(Usage {
                prompt_tokens: 20,
                completion_tokens: 10,
                total_tokens: 30,
            }),
        })
    }

    async fn chat_stream(
        &self,
        model: &str,
        _req: &ChatOutcall,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), AiError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        for token in ["Your ", "week ", "was ", "good."] {
            let _ = tx
                .send(StreamEvent::TextDelta {
                    text: token.to_string(),
                })
                .await;
        }
        let _ = tx
            .send(StreamEvent::Done {
                model: model.to_string(),
                prompt_tokens: 12,
                completion_tokens: 4,
            })
            .await;
        Ok(())
    }

    async fn embed(&self, _model: &str, text: &str) -> Result<(Vec<f32>, Option<Usage>), AiError> {
        Ok((toy_embedding(text), None))
    }
}

pub struct ToyEmbedder;

#[async_trait]
impl Embedder for ToyEmbedder {
    async fn embed(&self, text: &str) -> vita_rag::Result<Vec<f32>> {
        Ok(toy_embedding(text))
    }
}

fn toy_embedding(text: &str) -> Vec<f32> {
    let mut v = [0f32; 8];
    for c in text.chars() {
        v[(c as usize) % 8] += 1.0;
    }
    v.to_vec()
}

pub struct TestEnv {
    pub pipeline: Arc<IngestPipeline>,
    pub chat: Arc<ChatService>,
    pub records: Arc<RecordStore>,
    pub chat_store: Arc<ChatStore>,
    pub ledger: Arc<UsageLedger>,
    pub provider: Arc<FakeProvider>,
    pub _upload_dir: tempfile::TempDir,
    pub _vector_dir: tempfile::TempDir,
}

fn memory_conn() -> rusqlite::Connection {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    vita_store::db::init_db(&conn).unwrap();
    conn
}

fn roster() -> ModelRoster {
    ModelRoster {
        vision: "glm-4.6v".into(),
        vision_flash: "glm-4.6v-flash".into(),
        text: "glm-4.7".into(),
        text_flash: "glm-4.7-flash".into(),
        smart: "glm-4.7".into(),
        embedding: "embedding-3".into(),
    }
}

pub fn build_env(provider: FakeProvider) -> TestEnv {
    let records = Arc::new(RecordStore::new(memory_conn()));
    let settings = Arc::new(SettingsStore::new(memory_conn()));
    let chat_store = Arc::new(ChatStore::new(memory_conn()));
    let ledger = Arc::new(UsageLedger::new(memory_conn()));

    let provider = Arc::new(provider);
    let gateway = Arc::new(AiGateway::new(
        Some(provider.clone() as Arc<dyn ChatProvider>),
        roster(),
        Some(ledger.clone()),
    ));

    let vector_dir = tempfile::tempdir().unwrap();
    let vector_store = Arc::new(VectorStore::open(vector_dir.path()).unwrap());
    let indexer = Arc::new(VectorIndexer::new(vector_store, Arc::new(ToyEmbedder)));

    let upload_dir = tempfile::tempdir().unwrap();
    let images = Arc::new(ImageStorage::new(upload_dir.path()));

    let pipeline = Arc::new(IngestPipeline::new(
        records.clone(),
        settings.clone(),
        gateway.clone(),
        indexer.clone(),
        images,
    ));
    let chat = Arc::new(ChatService::new(
        chat_store.clone(),
        records.clone(),
        indexer,
        gateway,
    ));

    TestEnv {
        pipeline,
        chat,
        records,
        chat_store,
        ledger,
        provider,
        _upload_dir: upload_dir,
        _vector_dir: vector_dir,
    }
}

/// A tiny valid PNG for image-path tests.
pub fn png_bytes() -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        48,
        32,
        image::Rgb([200, 180, 40]),
    ));
    let mut out = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}
