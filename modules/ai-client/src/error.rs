//! Typed errors for Ollama requests.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OllamaError {
    /// The server could not be reached at all.
    #[error("Cannot connect to Ollama at {url}. Is it running?")]
    Connection { url: String },

    /// The configured model is not pulled on the server.
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// HTTP 500, usually a context window too large for available memory.
    #[error("Ollama server error (500): {0}")]
    ServerError(String),

    #[error("Request timed out after {secs}s (model: {model})")]
    Timeout { model: String, secs: u64 },

    /// Any other error reported by the server or the transport.
    #[error("Ollama API error: {0}")]
    Api(String),

    #[error("Model returned empty response")]
    EmptyResponse,
}

impl OllamaError {
    /// Errors that will fail every subsequent request too.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OllamaError::Connection { .. }
                | OllamaError::ModelNotFound(_)
                | OllamaError::ServerError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn systemic_errors_are_fatal() {
        assert!(OllamaError::Connection {
            url: "http://localhost:11434".into()
        }
        .is_fatal());
        assert!(OllamaError::ModelNotFound("llama3.2".into()).is_fatal());
        assert!(OllamaError::ServerError("oom".into()).is_fatal());
    }

    #[test]
    fn per_request_errors_are_not_fatal() {
        assert!(!OllamaError::Timeout {
            model: "llama3.2".into(),
            secs: 120
        }
        .is_fatal());
        assert!(!OllamaError::Api("HTTP 400".into()).is_fatal());
        assert!(!OllamaError::EmptyResponse.is_fatal());
    }
}
