//! Embeddings trait implemented by the embedding pipeline's methods.

use async_trait::async_trait;

use crate::core::error::Result;

/// Text embedding interface.
///
/// Implementations fix their output dimensionality at construction; all
/// vectors produced by one implementation share it.
#[async_trait]
pub trait Embeddings: Send + Sync {
    /// Embed a batch of documents.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query string.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_documents(&[text.to_string()]).await?;
        out.pop()
            .ok_or_else(|| crate::core::error::Error::model("Embedder returned no vector"))
    }

    /// Output vector dimensionality.
    fn dimension(&self) -> usize;

    /// Short method name for logs and cache keys (e.g. "ollama", "tfidf").
    fn name(&self) -> &'static str;
}
