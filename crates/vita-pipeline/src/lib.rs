pub mod chat;
pub mod error;
pub mod images;
pub mod ingest;
pub mod progress;
pub mod regen;

pub use chat::service::ChatService;
pub use error::PipelineError;
pub use images::ImageStorage;
pub use ingest::{FeedInput, FeedOutcome, IngestPipeline};
pub use progress::ProgressEvent;
