//! Embedding pipeline with a three-way fallback.
//!
//! The method is chosen once, at construction: a local transformer model
//! (behind the `local-embeddings` feature) first, then the LLM service's
//! embedding endpoint, then deterministic TF-IDF-style hashing vectors
//! with 384 features. The selected method is fixed: a per-call failure
//! surfaces as an error rather than silently switching methods.
//!
//! Every path is wrapped by the embedding cache, keyed on
//! `sha256(text)` + method name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bankflow::{Embeddings, Result};
use bankflow_cache::RagCache;
use bankflow_ollama::{OllamaClient, OllamaEmbeddings};
use sha2::{Digest, Sha256};
use tracing::info;

/// Output dimensionality of the hashing fallback.
pub const TFIDF_DIMENSION: usize = 384;

/// Deterministic hashing term-frequency embedder.
///
/// Replaces a fitted TF-IDF vectorizer with the hashing trick: each
/// lowercase alphanumeric token maps to a bucket by hash, weighted by
/// in-document term frequency, then the vector is L2-normalized. No
/// corpus state, so queries and documents embed identically across
/// processes.
#[derive(Debug, Default, Clone)]
pub struct HashingTfIdfEmbeddings;

impl HashingTfIdfEmbeddings {
    pub fn new() -> Self {
        Self
    }

    fn embed_one(text: &str) -> Vec<f32> {
        let mut counts: HashMap<usize, f32> = HashMap::new();
        let mut total = 0.0f32;
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 1)
        {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) as usize
                % TFIDF_DIMENSION;
            *counts.entry(bucket).or_insert(0.0) += 1.0;
            total += 1.0;
        }

        let mut vector = vec![0.0f32; TFIDF_DIMENSION];
        if total > 0.0 {
            for (bucket, count) in counts {
                vector[bucket] = count / total;
            }
            let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm > f32::EPSILON {
                for v in &mut vector {
                    *v /= norm;
                }
            }
        }
        vector
    }
}

#[async_trait]
impl Embeddings for HashingTfIdfEmbeddings {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| Self::embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        TFIDF_DIMENSION
    }

    fn name(&self) -> &'static str {
        "tfidf"
    }
}

#[cfg(feature = "local-embeddings")]
mod local {
    use super::*;
    use std::sync::Mutex;

    /// Local transformer embeddings via fastembed (all-MiniLM-L6-v2).
    pub struct LocalEmbeddings {
        model: Mutex<fastembed::TextEmbedding>,
    }

    impl LocalEmbeddings {
        pub fn try_new() -> Result<Self> {
            let model = fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(fastembed::EmbeddingModel::AllMiniLML6V2),
            )
            .map_err(|e| bankflow::Error::model(format!("Local embedding model failed: {e}")))?;
            Ok(Self {
                model: Mutex::new(model),
            })
        }
    }

    #[async_trait]
    impl Embeddings for LocalEmbeddings {
        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut model = self
                .model
                .lock()
                .map_err(|e| bankflow::Error::model(format!("Embedding lock poisoned: {e}")))?;
            model
                .embed(texts.to_vec(), None)
                .map_err(|e| bankflow::Error::model(format!("Local embedding failed: {e}")))
        }

        fn dimension(&self) -> usize {
            384
        }

        fn name(&self) -> &'static str {
            "local"
        }
    }
}

/// The cache-wrapped embedding pipeline.
pub struct EmbeddingPipeline {
    embedder: Arc<dyn Embeddings>,
    cache: Arc<RagCache>,
}

impl EmbeddingPipeline {
    /// Pick the method once: local model → Ollama endpoint → hashing TF-IDF.
    pub async fn build(client: Arc<OllamaClient>, cache: Arc<RagCache>) -> Self {
        #[cfg(feature = "local-embeddings")]
        {
            match local::LocalEmbeddings::try_new() {
                Ok(model) => {
                    info!("Embedding method: local transformer");
                    return Self {
                        embedder: Arc::new(model),
                        cache,
                    };
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Local embedding model unavailable");
                }
            }
        }

        if client.is_available().await {
            info!("Embedding method: ollama");
            Self {
                embedder: Arc::new(OllamaEmbeddings::new(client)),
                cache,
            }
        } else {
            info!("Embedding method: tfidf (LLM endpoint unreachable)");
            Self {
                embedder: Arc::new(HashingTfIdfEmbeddings::new()),
                cache,
            }
        }
    }

    /// Pipeline pinned to a specific embedder (tests, offline ingestion).
    pub fn with_embedder(embedder: Arc<dyn Embeddings>, cache: Arc<RagCache>) -> Self {
        Self { embedder, cache }
    }

    /// Selected method name.
    pub fn method(&self) -> &'static str {
        self.embedder.name()
    }

    /// Output dimensionality of the selected method.
    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    /// Embed one query, cache-first.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        if let Ok(Some(cached)) = self.cache.get_embedding(text, self.embedder.name()) {
            return Ok(cached);
        }
        let vector = self.embedder.embed_query(text).await?;
        let _ = self.cache.store_embedding(text, self.embedder.name(), &vector);
        Ok(vector)
    }

    /// Embed a document batch, cache-first per document.
    pub async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut misses = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            match self.cache.get_embedding(text, self.embedder.name()) {
                Ok(Some(cached)) => out[i] = Some(cached),
                _ => misses.push(i),
            }
        }

        if !misses.is_empty() {
            let miss_texts: Vec<String> = misses.iter().map(|i| texts[*i].clone()).collect();
            let vectors = self.embedder.embed_documents(&miss_texts).await?;
            for (slot, vector) in misses.iter().zip(vectors) {
                let _ = self
                    .cache
                    .store_embedding(&texts[*slot], self.embedder.name(), &vector);
                out[*slot] = Some(vector);
            }
        }

        Ok(out.into_iter().flatten().collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_tfidf_deterministic_and_normalized() {
        let a = HashingTfIdfEmbeddings::embed_one("fraud detection rules for wire transfers");
        let b = HashingTfIdfEmbeddings::embed_one("fraud detection rules for wire transfers");
        assert_eq!(a, b);
        assert_eq!(a.len(), TFIDF_DIMENSION);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_tfidf_similar_texts_closer() {
        let a = HashingTfIdfEmbeddings::embed_one("credit risk scoring model");
        let b = HashingTfIdfEmbeddings::embed_one("credit risk scoring approach");
        let c = HashingTfIdfEmbeddings::embed_one("cafeteria lunch menu pasta");
        let dot = |x: &[f32], y: &[f32]| x.iter().zip(y).map(|(a, b)| a * b).sum::<f32>();
        assert!(dot(&a, &b) > dot(&a, &c));
    }

    #[test]
    fn test_tfidf_empty_text_is_zero_vector() {
        let v = HashingTfIdfEmbeddings::embed_one("");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_pipeline_caches_embeddings() {
        let cache = Arc::new(RagCache::in_memory().unwrap());
        let pipeline = EmbeddingPipeline::with_embedder(
            Arc::new(HashingTfIdfEmbeddings::new()),
            Arc::clone(&cache),
        );

        let v1 = pipeline.embed_query("what is aml").await.unwrap();
        assert!(cache.get_embedding("what is aml", "tfidf").unwrap().is_some());
        let v2 = pipeline.embed_query("what is aml").await.unwrap();
        assert_eq!(v1, v2);
    }

    #[tokio::test]
    async fn test_batch_mixes_cache_hits_and_misses() {
        let cache = Arc::new(RagCache::in_memory().unwrap());
        let pipeline = EmbeddingPipeline::with_embedder(
            Arc::new(HashingTfIdfEmbeddings::new()),
            Arc::clone(&cache),
        );

        pipeline.embed_query("alpha").await.unwrap();
        let out = pipeline
            .embed_documents(&["alpha".to_string(), "beta".to_string()])
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert!(cache.get_embedding("beta", "tfidf").unwrap().is_some());
    }
}
