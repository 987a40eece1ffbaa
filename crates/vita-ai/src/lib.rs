pub mod classifier;
pub mod dimensions;
pub mod error;
pub mod extractor;
pub mod gateway;
pub mod json_repair;
pub mod limiter;
pub mod provider;
pub mod stream;
pub mod tagger;

pub use error::AiError;
pub use gateway::{AiGateway, ChatMessage, Completion, ModelRoster};
pub use provider::{ChatOutcall, ChatProvider, ChatReply, OpenAiCompatProvider, Usage};
pub use stream::StreamEvent;
