use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("Vector storage error: {0}")]
    Storage(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for RagError {
    fn from(e: rusqlite::Error) -> Self {
        RagError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
