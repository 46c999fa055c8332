//! Ollama embeddings implementation of the core [`Embeddings`] trait.

use std::sync::Arc;

use async_trait::async_trait;
use bankflow::{Embeddings, Result};

use crate::OllamaClient;

/// Embeddings via an Ollama embedding model.
///
/// Common models: `nomic-embed-text` (768 dims), `mxbai-embed-large`
/// (1024 dims), `all-minilm` (384 dims). The dimension is declared at
/// construction and validated downstream by the vector store.
#[derive(Clone)]
pub struct OllamaEmbeddings {
    client: Arc<OllamaClient>,
    model: String,
    dimension: usize,
}

impl OllamaEmbeddings {
    /// Embedder on `client` with the default `nomic-embed-text` model.
    pub fn new(client: Arc<OllamaClient>) -> Self {
        Self {
            client,
            model: "nomic-embed-text".to_string(),
            dimension: 768,
        }
    }

    /// Override the embedding model and its dimensionality.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>, dimension: usize) -> Self {
        self.model = model.into();
        self.dimension = dimension;
        self
    }

    /// The configured embedding model name.
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Embeddings for OllamaEmbeddings {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.client.embed_with_model(&self.model, text).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let client = Arc::new(OllamaClient::new("http://localhost:11434", "llama3.2"));
        let e = OllamaEmbeddings::new(client);
        assert_eq!(e.model(), "nomic-embed-text");
        assert_eq!(e.dimension(), 768);
        assert_eq!(e.name(), "ollama");
    }

    #[test]
    fn test_with_model() {
        let client = Arc::new(OllamaClient::new("http://localhost:11434", "llama3.2"));
        let e = OllamaEmbeddings::new(client).with_model("all-minilm", 384);
        assert_eq!(e.dimension(), 384);
    }
}
