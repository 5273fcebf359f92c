use std::time::Duration;

use reqwest::StatusCode;
use tracing::debug;

use super::types::*;
use crate::error::OllamaError;

const DEFAULT_CHAT_MODEL: &str = "llama3.2";
const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";

/// Client for a local Ollama server, one request per call. Every failure is
/// mapped onto an `OllamaError` variant so callers can decide between
/// stopping a batch and moving on to the next item.
#[derive(Clone)]
pub struct Ollama {
    http: reqwest::Client,
    base_url: String,
    chat_model: String,
    embed_model: String,
    num_ctx: u32,
    temperature: f32,
    request_timeout: Duration,
    embed_timeout: Duration,
}

impl Ollama {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            num_ctx: 4096,
            temperature: 0.3,
            request_timeout: Duration::from_secs(120),
            embed_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_chat_model(mut self, model: &str) -> Self {
        self.chat_model = model.to_string();
        self
    }

    pub fn with_embed_model(mut self, model: &str) -> Self {
        self.embed_model = model.to_string();
        self
    }

    pub fn with_options(mut self, num_ctx: u32, temperature: f32) -> Self {
        self.num_ctx = num_ctx;
        self.temperature = temperature;
        self
    }

    pub fn with_timeouts(mut self, request: Duration, embed: Duration) -> Self {
        self.request_timeout = request;
        self.embed_timeout = embed;
        self
    }

    pub fn chat_model(&self) -> &str {
        &self.chat_model
    }

    /// Single non-streaming completion. Returns the trimmed response text.
    pub async fn generate(&self, system: &str, prompt: &str) -> Result<String, OllamaError> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: self.chat_model.clone(),
            prompt: prompt.to_string(),
            system: (!system.is_empty()).then(|| system.to_string()),
            stream: false,
            options: GenerateOptions {
                num_ctx: self.num_ctx,
                temperature: self.temperature,
            },
        };

        debug!(model = %self.chat_model, prompt_chars = prompt.len(), "Ollama generate request");

        let response = self
            .http
            .post(&url)
            .timeout(self.request_timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e, &self.chat_model, self.request_timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body, self.num_ctx));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| OllamaError::Api(format!("Invalid response body: {e}")))?;

        if let Some(error) = body.error {
            return Err(classify_body_error(error));
        }

        let text = body.response.trim();
        if text.is_empty() {
            return Err(OllamaError::EmptyResponse);
        }
        Ok(text.to_string())
    }

    /// Embed a single text with the embedding model.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, OllamaError> {
        let url = format!("{}/api/embed", self.base_url);
        let request = EmbedRequest {
            model: self.embed_model.clone(),
            input: text.to_string(),
        };

        debug!(model = %self.embed_model, chars = text.len(), "Ollama embed request");

        let response = self
            .http
            .post(&url)
            .timeout(self.embed_timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e, &self.embed_model, self.embed_timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body, self.num_ctx));
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| OllamaError::Api(format!("Invalid response body: {e}")))?;

        if let Some(error) = body.error {
            return Err(classify_body_error(error));
        }

        match body.embeddings.into_iter().next() {
            Some(embedding) if !embedding.is_empty() => Ok(embedding),
            _ => Err(OllamaError::EmptyResponse),
        }
    }

    fn transport_error(&self, e: reqwest::Error, model: &str, timeout: Duration) -> OllamaError {
        if e.is_timeout() {
            OllamaError::Timeout {
                model: model.to_string(),
                secs: timeout.as_secs(),
            }
        } else if e.is_connect() {
            OllamaError::Connection {
                url: self.base_url.clone(),
            }
        } else {
            OllamaError::Api(format!("Request failed: {e}"))
        }
    }
}

/// Map a non-success HTTP status (and its body) to an error.
pub(crate) fn classify_status(status: StatusCode, body: &str, num_ctx: u32) -> OllamaError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .unwrap_or_else(|| body.trim().to_string());

    match status {
        StatusCode::INTERNAL_SERVER_ERROR => OllamaError::ServerError(format!(
            "likely num_ctx={num_ctx} is too large for available memory: {message}"
        )),
        StatusCode::NOT_FOUND => OllamaError::ModelNotFound(message),
        _ if is_model_missing(&message) => OllamaError::ModelNotFound(message),
        _ => OllamaError::Api(format!("HTTP {}: {message}", status.as_u16())),
    }
}

/// Map an error reported inside a response body.
pub(crate) fn classify_body_error(message: String) -> OllamaError {
    if is_model_missing(&message) {
        OllamaError::ModelNotFound(message)
    } else {
        OllamaError::Api(message)
    }
}

fn is_model_missing(message: &str) -> bool {
    message.to_lowercase().contains("not found")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_status_is_fatal() {
        let err = classify_status(StatusCode::INTERNAL_SERVER_ERROR, "", 8192);
        assert!(matches!(err, OllamaError::ServerError(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn missing_model_is_detected_from_status_and_body() {
        let body = r#"{"error":"model 'llama9' not found, try pulling it first"}"#;
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, body, 4096),
            OllamaError::ModelNotFound(m) if m.contains("llama9")
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, body, 4096),
            OllamaError::ModelNotFound(_)
        ));
        assert!(matches!(
            classify_body_error("model \"x\" not found".into()),
            OllamaError::ModelNotFound(_)
        ));
    }

    #[test]
    fn other_statuses_are_api_errors() {
        let err = classify_status(StatusCode::BAD_REQUEST, "bad input", 4096);
        assert!(matches!(err, OllamaError::Api(ref m) if m == "HTTP 400: bad input"));
        assert!(!err.is_fatal());
        assert!(matches!(
            classify_body_error("context overflow".into()),
            OllamaError::Api(_)
        ));
    }

    #[test]
    fn base_url_trailing_slash_is_dropped() {
        let client = Ollama::new("http://localhost:11434/").with_chat_model("mistral");
        assert_eq!(client.base_url, "http://localhost:11434");
        assert_eq!(client.chat_model(), "mistral");
    }

    #[tokio::test]
    async fn unreachable_server_is_a_connection_error() {
        // Port 9 (discard) on loopback is closed in test environments.
        let client = Ollama::new("http://127.0.0.1:9")
            .with_timeouts(Duration::from_secs(5), Duration::from_secs(5));
        let err = client.embed("hello").await.unwrap_err();
        assert!(
            matches!(err, OllamaError::Connection { .. }),
            "unexpected error: {err:?}"
        );
    }
}
