use std::sync::Arc;

use axum::{
    routing::{get, patch, post},
    Router,
};
use async_trait::async_trait;
use tower_http::cors::CorsLayer;

use vita_ai::AiGateway;
use vita_core::config::Settings;
use vita_pipeline::{ChatService, ImageStorage, IngestPipeline};
use vita_rag::{Embedder, VectorIndexer, VectorStore};
use vita_store::{ChatStore, RecordStore, SettingsStore, UsageLedger};

use crate::auth::TokenStore;

/// Central shared state — passed as `Arc<AppState>` to all handlers.
pub struct AppState {
    pub settings: Settings,
    pub pipeline: Arc<IngestPipeline>,
    pub chat: Arc<ChatService>,
    pub records: Arc<RecordStore>,
    pub chat_store: Arc<ChatStore>,
    pub app_settings: Arc<SettingsStore>,
    pub ledger: Arc<UsageLedger>,
    pub gateway: Arc<AiGateway>,
    pub images: Arc<ImageStorage>,
    pub tokens: TokenStore,
}

/// Embedding seam implementation: route embed calls through the AI gateway
/// so they share the limiter and the usage ledger.
struct GatewayEmbedder(Arc<AiGateway>);

#[async_trait]
impl Embedder for GatewayEmbedder {
    async fn embed(&self, text: &str) -> vita_rag::Result<Vec<f32>> {
        self.0
            .embed(text, None)
            .await
            .map_err(|e| vita_rag::RagError::Embedding(e.to_string()))
    }
}

impl AppState {
    pub fn new(settings: Settings) -> anyhow::Result<Self> {
        let db_path = settings.database_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // One connection per store; WAL keeps cross-connection writes sane.
        let open = || -> anyhow::Result<rusqlite::Connection> {
            let conn = rusqlite::Connection::open(&db_path)?;
            vita_store::db::init_db(&conn)?;
            Ok(conn)
        };
        let records = Arc::new(RecordStore::new(open()?));
        let chat_store = Arc::new(ChatStore::new(open()?));
        let app_settings = Arc::new(SettingsStore::new(open()?));
        let ledger = Arc::new(UsageLedger::new(open()?));

        let gateway = Arc::new(AiGateway::from_settings(&settings, Some(ledger.clone())));

        let vector_store = Arc::new(VectorStore::open(&settings.vector_persist_dir())?);
        let indexer = Arc::new(VectorIndexer::new(
            vector_store,
            Arc::new(GatewayEmbedder(gateway.clone())),
        ));

        let images = Arc::new(ImageStorage::new(settings.upload_root()));

        let pipeline = Arc::new(IngestPipeline::new(
            records.clone(),
            app_settings.clone(),
            gateway.clone(),
            indexer.clone(),
            images.clone(),
        ));
        let chat = Arc::new(ChatService::new(
            chat_store.clone(),
            records.clone(),
            indexer,
            gateway.clone(),
        ));

        let tokens = TokenStore::new(settings.token_expire_seconds);

        Ok(Self {
            settings,
            pipeline,
            chat,
            records,
            chat_store,
            app_settings,
            ledger,
            gateway,
            images,
            tokens,
        })
    }
}

/// Assemble the full router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.settings);
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/api/auth/login", post(crate::auth::login_handler))
        .route("/api/auth/verify", post(crate::auth::verify_handler))
        .route("/api/auth/logout", post(crate::auth::logout_handler))
        .route("/api/feed", post(crate::http::feed::feed_handler))
        .route(
            "/api/feed/stream",
            post(crate::http::feed::feed_stream_handler),
        )
        .route(
            "/api/feed/history",
            get(crate::http::feed::history_handler),
        )
        .route("/api/feed/export", get(crate::http::feed::export_handler))
        .route(
            "/api/feed/{id}",
            get(crate::http::feed::detail_handler).delete(crate::http::feed::delete_handler),
        )
        .route(
            "/api/feed/{id}/regenerate",
            post(crate::http::feed::regenerate_handler),
        )
        .route(
            "/api/feed/{id}/visibility",
            patch(crate::http::feed::visibility_handler),
        )
        .route(
            "/api/feed/{id}/bookmark",
            patch(crate::http::feed::bookmark_handler),
        )
        .route(
            "/api/feed/image/{*path}",
            get(crate::http::images::image_handler),
        )
        .route("/api/chat/stream", post(crate::http::chat::stream_handler))
        .route(
            "/api/chat/message",
            post(crate::http::chat::message_handler),
        )
        .route(
            "/api/chat/suggestions",
            get(crate::http::chat::suggestions_handler),
        )
        .route(
            "/api/chat/conversations",
            get(crate::http::chat::list_conversations_handler)
                .post(crate::http::chat::create_conversation_handler),
        )
        .route(
            "/api/chat/conversations/{id}",
            get(crate::http::chat::get_conversation_handler)
                .patch(crate::http::chat::rename_conversation_handler)
                .delete(crate::http::chat::delete_conversation_handler),
        )
        .route(
            "/api/settings/nickname",
            get(crate::http::settings::get_nickname_handler)
                .put(crate::http::settings::set_nickname_handler),
        )
        .route("/api/tokens/stats", get(crate::http::usage::stats_handler))
        .route(
            "/api/tokens/recent",
            get(crate::http::usage::recent_handler),
        )
        .route("/api/tags/trending", get(crate::http::tags::trending_handler))
        .route("/api/rag/stats", get(crate::http::rag::stats_handler))
        .route("/api/rag/reindex", post(crate::http::rag::reindex_handler))
        .with_state(state)
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(settings: &Settings) -> CorsLayer {
    use axum::http::{HeaderValue, Method};
    let origins: Vec<HeaderValue> = settings
        .cors_origin_list()
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers(tower_http::cors::Any)
}
