use crate::model::DriftChannel;

/// Engine-wide error taxonomy. Per-probe errors are converted to
/// `adapter_error` findings inside adapters; per-job errors are caught by the
/// engine. Only `Persistence` at the engine level fails an execution.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Connection-level failure; retriable.
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-2xx reply; retriable iff 5xx.
    #[error("http status {status} from endpoint: {body}")]
    HttpStatus { status: u16, body: String },

    /// The payload template did not render to valid JSON. Fatal to the probe.
    #[error("payload render error: {0}")]
    PayloadRender(String),

    /// Wraps any adapter-internal fault, including error-envelope replies.
    #[error("adapter error: {0}")]
    Adapter(String),

    #[error("normalization error: {0}")]
    Normalization(String),

    /// Embedding service unreachable or replied with a malformed payload.
    /// Non-fatal to the enclosing execution.
    #[error("embedding service error: {0}")]
    EmbeddingService(String),

    #[error("baseline not found: {0}")]
    BaselineNotFound(String),

    #[error("baseline not usable: {0}")]
    BaselineNotUsable(String),

    /// A single drift channel failed; the comparison as a whole continues.
    #[error("drift channel {channel:?} failed: {message}")]
    DriftChannel {
        channel: DriftChannel,
        message: String,
    },

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error("cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn is_retriable(&self) -> bool {
        match self {
            EngineError::Transport(_) => true,
            EngineError::HttpStatus { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Persistence(e.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            EngineError::HttpStatus {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            // Redact the URL: header secrets never appear in reqwest errors,
            // but query strings can carry keys on some gateways.
            EngineError::Transport(e.without_url().to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_classification() {
        assert!(EngineError::Transport("conn refused".into()).is_retriable());
        assert!(EngineError::HttpStatus {
            status: 503,
            body: String::new()
        }
        .is_retriable());
        assert!(!EngineError::HttpStatus {
            status: 404,
            body: String::new()
        }
        .is_retriable());
        assert!(!EngineError::PayloadRender("bad json".into()).is_retriable());
        assert!(!EngineError::Cancelled.is_retriable());
    }
}
