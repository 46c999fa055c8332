//! Vector store backends for BankFlow.
//!
//! Three interchangeable backends behind one tagged variant; callers pick an
//! engine at construction and never see the branch again:
//!
//! - [`DenseStore`]: one flat inner-product index per collection, embeddings
//!   L2-normalized on the way in so inner product equals cosine similarity.
//!   Snapshots to `<collection>.index` (bincode) + `<collection>_metadata.json`.
//! - [`QdrantStore`]: delegates to an external Qdrant service.
//! - [`SqliteVectorStore`]: `vectors` table with raw little-endian `f32`
//!   blobs; cosine computed in-process. The fallback for hosts without an
//!   ANN service; fine up to ~100K vectors per collection.
//!
//! Uniform contract: upsert by `chunk_id`, searches sorted by descending
//! similarity, metadata filters are equality checks (an unmatched filter key
//! yields zero results), `delete_collection` is atomic.

mod dense;
mod qdrant_store;
mod sqlite_store;

pub use dense::DenseStore;
pub use qdrant_store::QdrantStore;
pub use sqlite_store::SqliteVectorStore;

use std::collections::HashMap;

use bankflow::core::documents::ScoredChunk;
use bankflow::core::sanitize::validate_use_case_key;
use bankflow::{Chunk, Error, Result, Settings};
use serde::Serialize;
use serde_json::Value;

/// Metadata equality filters.
pub type Filters = HashMap<String, Value>;

/// Backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorEngine {
    Dense,
    Qdrant,
    Sqlite,
}

impl VectorEngine {
    /// Parse an engine name ("dense", "qdrant", "sqlite").
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "dense" | "flat" => Ok(Self::Dense),
            "qdrant" => Ok(Self::Qdrant),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(Error::validation(format!("Unknown vector engine: '{other}'"))),
        }
    }
}

/// Per-collection stats.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    pub name: String,
    pub documents: usize,
}

/// Store-wide stats.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub backend: &'static str,
    pub total_collections: usize,
    pub total_documents: usize,
    pub collections: Vec<CollectionStats>,
}

/// The polymorphic vector store.
pub enum VectorBackend {
    Dense(DenseStore),
    Qdrant(QdrantStore),
    Sqlite(SqliteVectorStore),
}

impl VectorBackend {
    /// Open a backend against the configured storage locations.
    pub fn open(engine: VectorEngine, settings: &Settings) -> Result<Self> {
        match engine {
            VectorEngine::Dense => Ok(Self::Dense(DenseStore::open(&settings.vector_store_dir())?)),
            VectorEngine::Qdrant => Ok(Self::Qdrant(QdrantStore::connect(&settings.qdrant_url)?)),
            VectorEngine::Sqlite => Ok(Self::Sqlite(SqliteVectorStore::open(
                &settings.vector_store_dir().join("vectors.db"),
            )?)),
        }
    }

    /// Backend name for stats and logs.
    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Dense(_) => "dense",
            Self::Qdrant(_) => "qdrant",
            Self::Sqlite(_) => "sqlite",
        }
    }

    /// Upsert chunks with their embeddings into a collection.
    ///
    /// # Errors
    ///
    /// `Validation` when the collection name is unsafe, chunk and embedding
    /// counts differ, or dimensionality disagrees within the collection.
    pub async fn add_documents(
        &self,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
        collection: &str,
    ) -> Result<usize> {
        check_collection_name(collection)?;
        if chunks.len() != embeddings.len() {
            return Err(Error::validation(format!(
                "chunks ({}) and embeddings ({}) length mismatch",
                chunks.len(),
                embeddings.len()
            )));
        }
        if chunks.is_empty() {
            return Ok(0);
        }
        match self {
            Self::Dense(s) => s.add_documents(chunks, embeddings, collection),
            Self::Qdrant(s) => s.add_documents(chunks, embeddings, collection).await,
            Self::Sqlite(s) => s.add_documents(chunks, embeddings, collection),
        }
    }

    /// Top-k search by query embedding, optionally filtered on metadata.
    pub async fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        collection: &str,
        filters: Option<&Filters>,
    ) -> Result<Vec<ScoredChunk>> {
        check_collection_name(collection)?;
        match self {
            Self::Dense(s) => s.search(query_embedding, top_k, collection, filters),
            Self::Qdrant(s) => s.search(query_embedding, top_k, collection, filters).await,
            Self::Sqlite(s) => s.search(query_embedding, top_k, collection, filters),
        }
    }

    /// Drop a collection and its on-disk artifacts. Returns whether it existed.
    pub async fn delete_collection(&self, collection: &str) -> Result<bool> {
        check_collection_name(collection)?;
        match self {
            Self::Dense(s) => s.delete_collection(collection),
            Self::Qdrant(s) => s.delete_collection(collection).await,
            Self::Sqlite(s) => s.delete_collection(collection),
        }
    }

    /// Collection names currently present.
    pub async fn list_collections(&self) -> Result<Vec<String>> {
        match self {
            Self::Dense(s) => s.list_collections(),
            Self::Qdrant(s) => s.list_collections().await,
            Self::Sqlite(s) => s.list_collections(),
        }
    }

    /// Current store statistics.
    pub async fn stats(&self) -> Result<StoreStats> {
        let collections = self.list_collections().await?;
        let mut per_collection = Vec::with_capacity(collections.len());
        let mut total = 0;
        for name in collections {
            let documents = match self {
                Self::Dense(s) => s.count(&name)?,
                Self::Qdrant(s) => s.count(&name).await?,
                Self::Sqlite(s) => s.count(&name)?,
            };
            total += documents;
            per_collection.push(CollectionStats { name, documents });
        }
        Ok(StoreStats {
            backend: self.backend_name(),
            total_collections: per_collection.len(),
            total_documents: total,
            collections: per_collection,
        })
    }
}

fn check_collection_name(collection: &str) -> Result<()> {
    if !validate_use_case_key(collection) {
        return Err(Error::validation(format!(
            "Invalid collection name: '{collection}'"
        )));
    }
    Ok(())
}

/// Equality match of `filter` against chunk metadata. Missing keys fail.
pub(crate) fn matches_filters(metadata: &HashMap<String, Value>, filters: Option<&Filters>) -> bool {
    let Some(filters) = filters else {
        return true;
    };
    filters
        .iter()
        .all(|(key, expected)| metadata.get(key) == Some(expected))
}

/// L2-normalize in place; zero vectors are left untouched.
pub(crate) fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity of two equal-length vectors.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na <= f32::EPSILON || nb <= f32::EPSILON {
        return 0.0;
    }
    dot / (na * nb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_parse() {
        assert_eq!(VectorEngine::parse("Dense").unwrap(), VectorEngine::Dense);
        assert_eq!(VectorEngine::parse("sqlite").unwrap(), VectorEngine::Sqlite);
        assert!(VectorEngine::parse("chroma").is_err());
    }

    #[test]
    fn test_matches_filters() {
        let mut metadata = HashMap::new();
        metadata.insert("domain".to_string(), Value::String("fraud".to_string()));

        let mut filters = Filters::new();
        filters.insert("domain".to_string(), Value::String("fraud".to_string()));
        assert!(matches_filters(&metadata, Some(&filters)));

        filters.insert("region".to_string(), Value::String("emea".to_string()));
        // Unmatched filter key fails the whole predicate.
        assert!(!matches_filters(&metadata, Some(&filters)));

        assert!(matches_filters(&metadata, None));
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0_f32, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0_f32; 4];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0; 4]);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_collection_name_guard() {
        assert!(check_collection_name("uc_fr_01").is_ok());
        assert!(check_collection_name("../escape").is_err());
        assert!(check_collection_name("").is_err());
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_backend_dispatch_uniform_contract() {
        use bankflow::Chunk;

        let backend = VectorBackend::Sqlite(SqliteVectorStore::in_memory().unwrap());
        assert_eq!(backend.backend_name(), "sqlite");

        let chunks = vec![
            Chunk::new("rules.md", 0, "wire fraud thresholds".to_string(), 3)
                .with_metadata("domain", "fraud"),
            Chunk::new("rules.md", 1, "loan origination checks".to_string(), 3)
                .with_metadata("domain", "credit"),
        ];
        let embeddings = vec![vec![1.0, 0.0], vec![0.0, 1.0]];

        // Length mismatch is refused before any backend touches it.
        let err = backend
            .add_documents(&chunks, &embeddings[..1], "uc_fr_01")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        assert_eq!(
            backend.add_documents(&chunks, &embeddings, "uc_fr_01").await.unwrap(),
            2
        );

        // Sorted descending, bounded by top_k, filters respected.
        let results = backend.search(&[1.0, 0.0], 1, "uc_fr_01", None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.chunk_id, "rules_0");

        let mut filters = Filters::new();
        filters.insert("domain".to_string(), Value::String("credit".to_string()));
        let filtered = backend
            .search(&[1.0, 0.0], 5, "uc_fr_01", Some(&filters))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].chunk.chunk_id, "rules_1");

        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.backend, "sqlite");
        assert_eq!(stats.total_collections, 1);
        assert_eq!(stats.total_documents, 2);

        // Unsafe collection names are rejected at the dispatch layer.
        assert!(backend.search(&[1.0, 0.0], 1, "../etc", None).await.is_err());

        assert!(backend.delete_collection("uc_fr_01").await.unwrap());
        assert!(backend.list_collections().await.unwrap().is_empty());
    }
}
