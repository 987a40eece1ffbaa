use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiError {
    /// No upstream credentials configured; callers take their mock path.
    #[error("AI client is not configured (missing API key)")]
    NotConfigured,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Unretryable provider error: {0}")]
    Unretryable(String),

    #[error("Concurrency limit for model {model} stayed full past the acquire deadline")]
    ConcurrencyExhausted { model: String },

    #[error("AI call failed after {attempts} attempts: {last}")]
    MaxRetriesExceeded { attempts: u32, last: String },

    #[error("Response parse failure: {0}")]
    Parse(String),
}

impl AiError {
    /// Retryability is decided by substring classification over the rendered
    /// error: rate limits (429 / provider code 1302) and transient server
    /// errors qualify.
    pub fn is_retryable(&self) -> bool {
        match self {
            AiError::ConcurrencyExhausted { .. } => true,
            AiError::NotConfigured => false,
            other => {
                let text = other.to_string();
                ["429", "1302", "500", "502", "503", "504"]
                    .iter()
                    .any(|code| text.contains(code))
            }
        }
    }

    /// Rate-limit class errors back off harder than plain server faults.
    pub fn is_rate_limit(&self) -> bool {
        let text = self.to_string();
        text.contains("429") || text.contains("1302")
    }
}

pub type Result<T> = std::result::Result<T, AiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        let rate = AiError::Api {
            status: 429,
            message: "too many requests".into(),
        };
        assert!(rate.is_retryable());
        assert!(rate.is_rate_limit());

        let server = AiError::Api {
            status: 503,
            message: "overloaded".into(),
        };
        assert!(server.is_retryable());
        assert!(!server.is_rate_limit());

        let provider_code = AiError::Unretryable("error code 1302: concurrency".into());
        assert!(provider_code.is_retryable());
        assert!(provider_code.is_rate_limit());

        let auth = AiError::Api {
            status: 401,
            message: "bad key".into(),
        };
        assert!(!auth.is_retryable());
        assert!(!AiError::NotConfigured.is_retryable());
    }
}
