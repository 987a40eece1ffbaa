//! Wire shapes for the ingestion progress stream.
//!
//! The orchestrator produces these into a channel; the HTTP layer drains the
//! channel into an SSE response. Keeping the producer ignorant of transport
//! lets the deferred persistence in the producer run whether or not the
//! consumer is still listening.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Start,
    Retry,
    Done,
}

/// One event on the `/feed/stream` wire.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Phase {
        phase: String,
        status: PhaseStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    Result {
        #[serde(flatten)]
        payload: serde_json::Value,
    },
    Error {
        message: String,
    },
}

impl ProgressEvent {
    pub fn phase(phase: &str, status: PhaseStatus) -> Self {
        ProgressEvent::Phase {
            phase: phase.to_string(),
            status,
            label: None,
        }
    }

    pub fn phase_labeled(phase: &str, status: PhaseStatus, label: impl Into<String>) -> Self {
        ProgressEvent::Phase {
            phase: phase.to_string(),
            status,
            label: Some(label.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shapes() {
        let e = ProgressEvent::phase("classify", PhaseStatus::Start);
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "phase");
        assert_eq!(json["phase"], "classify");
        assert_eq!(json["status"], "start");
        assert!(json.get("label").is_none());

        let r = ProgressEvent::Result {
            payload: serde_json::json!({"id": "abc", "category": "MOOD"}),
        };
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["type"], "result");
        assert_eq!(json["id"], "abc");

        let err = ProgressEvent::Error {
            message: "boom".into(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "boom");
    }
}
