// Embeddings module
// Ollama integration and content chunking

pub mod chunking;
pub mod ollama;

pub use chunking::{ChunkingConfig, split_documents, split_text};
pub use ollama::OllamaClient;

use crate::Result;

/// Anything that can turn texts into vectors with a named model
pub trait Embedder: Send + Sync {
    /// One vector per input text, in input order
    fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

impl Embedder for OllamaClient {
    #[inline]
    fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.generate_embeddings(model, texts)
    }
}
