use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub stream: bool,
    pub options: GenerateOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateOptions {
    pub num_ctx: u32,
    pub temperature: f32,
}

/// Ollama reports model errors in the body, sometimes with a 200 status.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GenerateResponse {
    pub response: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedRequest {
    pub model: String,
    pub input: String,
}

/// `{"embeddings": [[f32; N]]}` for a single input.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmbedResponse {
    pub embeddings: Vec<Vec<f32>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ErrorBody {
    pub error: Option<String>,
}
