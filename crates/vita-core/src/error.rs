use thiserror::Error;

#[derive(Debug, Error)]
pub enum VitaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad input: {0}")]
    BadInput(String),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Database error: {0}")]
    Database(String),

    #[error("AI provider error: {0}")]
    AiProvider(String),

    #[error("Vector index error: {0}")]
    VectorIndex(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VitaError {
    /// Short error code string used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            VitaError::Config(_) => "CONFIG_ERROR",
            VitaError::AuthFailed(_) => "AUTH_FAILED",
            VitaError::NotFound(_) => "NOT_FOUND",
            VitaError::BadInput(_) => "BAD_INPUT",
            VitaError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            VitaError::Database(_) => "DATABASE_ERROR",
            VitaError::AiProvider(_) => "AI_PROVIDER_ERROR",
            VitaError::VectorIndex(_) => "VECTOR_INDEX_ERROR",
            VitaError::Serialization(_) => "SERIALIZATION_ERROR",
            VitaError::Io(_) => "IO_ERROR",
            VitaError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, VitaError>;
