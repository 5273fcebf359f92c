mod client;
mod types;

pub use client::Ollama;
pub use types::*;
