use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Bad input: {0}")]
    BadInput(String),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Store(#[from] vita_store::StoreError),

    #[error("AI error: {0}")]
    Ai(#[from] vita_ai::AiError),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
