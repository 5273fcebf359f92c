pub mod error;
pub mod ollama;
pub mod util;

pub use error::OllamaError;
pub use ollama::Ollama;
