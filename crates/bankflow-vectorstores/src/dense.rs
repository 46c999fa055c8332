//! Dense flat-index backend.
//!
//! One in-memory flat index per collection. Vectors are L2-normalized on
//! insert, so a dot product against a normalized query is cosine
//! similarity. Each collection snapshots to two files under the store
//! directory:
//!
//! - `<collection>.index`: bincode, fixed schema (dimension + vectors)
//! - `<collection>_metadata.json`: chunk records keyed by index position
//!
//! Legacy metadata that fails to parse as JSON is refused with a warning;
//! no object-graph deserialization of untrusted bytes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use bankflow::core::documents::ScoredChunk;
use bankflow::{Chunk, Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{l2_normalize, matches_filters, Filters};

#[derive(Serialize, Deserialize)]
struct IndexSnapshot {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
}

struct DenseCollection {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
    chunks: Vec<Chunk>,
    by_chunk_id: HashMap<String, usize>,
}

impl DenseCollection {
    fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
            chunks: Vec::new(),
            by_chunk_id: HashMap::new(),
        }
    }
}

/// Flat inner-product store with per-collection snapshots.
pub struct DenseStore {
    dir: PathBuf,
    collections: Mutex<HashMap<String, DenseCollection>>,
}

fn lock_err<T>(e: std::sync::PoisonError<T>) -> Error {
    Error::data(format!("Dense store lock poisoned: {e}"))
}

impl DenseStore {
    /// Open the store directory, loading every collection snapshot found.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let mut collections = HashMap::new();

        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(collection) = name.strip_suffix("_metadata.json") else {
                continue;
            };
            match Self::load_collection(dir, collection) {
                Ok(loaded) => {
                    collections.insert(collection.to_string(), loaded);
                }
                Err(e) => {
                    warn!(collection, error = %e, "Skipping unreadable collection snapshot; consider re-indexing");
                }
            }
        }

        debug!(collections = collections.len(), dir = %dir.display(), "Dense store opened");
        Ok(Self {
            dir: dir.to_path_buf(),
            collections: Mutex::new(collections),
        })
    }

    fn index_path(dir: &Path, collection: &str) -> PathBuf {
        dir.join(format!("{collection}.index"))
    }

    fn metadata_path(dir: &Path, collection: &str) -> PathBuf {
        dir.join(format!("{collection}_metadata.json"))
    }

    fn load_collection(dir: &Path, collection: &str) -> Result<DenseCollection> {
        let raw_meta = std::fs::read_to_string(Self::metadata_path(dir, collection))?;
        let chunks: Vec<Chunk> = serde_json::from_str(&raw_meta)
            .map_err(|e| Error::data(format!("Invalid metadata for '{collection}': {e}")))?;

        let raw_index = std::fs::read(Self::index_path(dir, collection))?;
        let snapshot: IndexSnapshot = bincode::deserialize(&raw_index)
            .map_err(|e| Error::data(format!("Invalid index snapshot for '{collection}': {e}")))?;

        if snapshot.vectors.len() != chunks.len() {
            return Err(Error::data(format!(
                "Snapshot mismatch for '{collection}': {} vectors vs {} chunks",
                snapshot.vectors.len(),
                chunks.len()
            )));
        }

        let by_chunk_id = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| (c.chunk_id.clone(), i))
            .collect();

        Ok(DenseCollection {
            dimension: snapshot.dimension,
            vectors: snapshot.vectors,
            chunks,
            by_chunk_id,
        })
    }

    fn persist(&self, collection: &str, data: &DenseCollection) -> Result<()> {
        let snapshot = IndexSnapshot {
            dimension: data.dimension,
            vectors: data.vectors.clone(),
        };
        let encoded = bincode::serialize(&snapshot)
            .map_err(|e| Error::data(format!("Failed to encode index snapshot: {e}")))?;
        std::fs::write(Self::index_path(&self.dir, collection), encoded)?;

        let meta = serde_json::to_string(&data.chunks)?;
        std::fs::write(Self::metadata_path(&self.dir, collection), meta)?;
        Ok(())
    }

    pub(crate) fn add_documents(
        &self,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
        collection: &str,
    ) -> Result<usize> {
        let dimension = embeddings[0].len();
        let mut collections = self.collections.lock().map_err(lock_err)?;
        let entry = collections
            .entry(collection.to_string())
            .or_insert_with(|| DenseCollection::new(dimension));

        if entry.dimension != dimension {
            return Err(Error::validation(format!(
                "Embedding dimension mismatch for '{collection}': expected {}, got {dimension}",
                entry.dimension
            )));
        }

        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            if embedding.len() != dimension {
                return Err(Error::validation(format!(
                    "Embedding dimension mismatch: expected {dimension}, got {}",
                    embedding.len()
                )));
            }
            let mut normalized = embedding.clone();
            l2_normalize(&mut normalized);

            match entry.by_chunk_id.get(&chunk.chunk_id) {
                Some(&i) => {
                    entry.vectors[i] = normalized;
                    entry.chunks[i] = chunk.clone();
                }
                None => {
                    entry.by_chunk_id.insert(chunk.chunk_id.clone(), entry.vectors.len());
                    entry.vectors.push(normalized);
                    entry.chunks.push(chunk.clone());
                }
            }
        }

        self.persist(collection, entry)?;
        Ok(chunks.len())
    }

    pub(crate) fn search(
        &self,
        query: &[f32],
        top_k: usize,
        collection: &str,
        filters: Option<&Filters>,
    ) -> Result<Vec<ScoredChunk>> {
        let collections = self.collections.lock().map_err(lock_err)?;
        let Some(entry) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        if query.len() != entry.dimension {
            return Err(Error::validation(format!(
                "Query dimension mismatch: expected {}, got {}",
                entry.dimension,
                query.len()
            )));
        }

        let mut normalized = query.to_vec();
        l2_normalize(&mut normalized);

        let mut scored: Vec<ScoredChunk> = entry
            .vectors
            .iter()
            .zip(&entry.chunks)
            .filter(|(_, chunk)| matches_filters(&chunk.metadata, filters))
            .map(|(vector, chunk)| ScoredChunk {
                chunk: chunk.clone(),
                score: vector.iter().zip(&normalized).map(|(a, b)| a * b).sum(),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    pub(crate) fn delete_collection(&self, collection: &str) -> Result<bool> {
        let mut collections = self.collections.lock().map_err(lock_err)?;
        let existed = collections.remove(collection).is_some();

        let index = Self::index_path(&self.dir, collection);
        let metadata = Self::metadata_path(&self.dir, collection);
        let had_files = index.exists() || metadata.exists();
        if index.exists() {
            std::fs::remove_file(index)?;
        }
        if metadata.exists() {
            std::fs::remove_file(metadata)?;
        }
        Ok(existed || had_files)
    }

    pub(crate) fn list_collections(&self) -> Result<Vec<String>> {
        let collections = self.collections.lock().map_err(lock_err)?;
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    pub(crate) fn count(&self, collection: &str) -> Result<usize> {
        let collections = self.collections.lock().map_err(lock_err)?;
        Ok(collections.get(collection).map_or(0, |c| c.chunks.len()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn chunk(id: usize, text: &str, domain: &str) -> Chunk {
        Chunk::new("policies.md", id, text.to_string(), 4).with_metadata("domain", domain)
    }

    fn store() -> (tempfile::TempDir, DenseStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DenseStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_add_and_search_sorted() {
        let (_dir, store) = store();
        let chunks = vec![
            chunk(0, "fraud rules", "fraud"),
            chunk(1, "credit scoring", "credit"),
            chunk(2, "aml checks", "aml"),
        ];
        let embeddings = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.9, 0.1, 0.0],
        ];
        store.add_documents(&chunks, &embeddings, "uc_fr_01").unwrap();

        let results = store.search(&[1.0, 0.0, 0.0], 2, "uc_fr_01", None).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.chunk_id, "policies_0");
        assert!(results[0].score >= results[1].score);
        assert!((results[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_filters_apply() {
        let (_dir, store) = store();
        let chunks = vec![chunk(0, "a", "fraud"), chunk(1, "b", "credit")];
        let embeddings = vec![vec![1.0, 0.0], vec![0.9, 0.1]];
        store.add_documents(&chunks, &embeddings, "uc_fr_01").unwrap();

        let mut filters = Filters::new();
        filters.insert("domain".to_string(), Value::String("credit".to_string()));
        let results = store
            .search(&[1.0, 0.0], 10, "uc_fr_01", Some(&filters))
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.chunk_id, "policies_1");

        filters.insert("missing".to_string(), Value::Bool(true));
        let none = store
            .search(&[1.0, 0.0], 10, "uc_fr_01", Some(&filters))
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_upsert_by_chunk_id() {
        let (_dir, store) = store();
        let first = vec![chunk(0, "v1", "fraud")];
        store.add_documents(&first, &[vec![1.0, 0.0]], "uc_fr_01").unwrap();

        let second = vec![chunk(0, "v2", "fraud")];
        store.add_documents(&second, &[vec![0.0, 1.0]], "uc_fr_01").unwrap();

        assert_eq!(store.count("uc_fr_01").unwrap(), 1);
        let results = store.search(&[0.0, 1.0], 1, "uc_fr_01", None).unwrap();
        assert_eq!(results[0].chunk.text, "v2");
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let (_dir, store) = store();
        store
            .add_documents(&[chunk(0, "a", "x")], &[vec![1.0, 0.0]], "uc_fr_01")
            .unwrap();
        let err = store
            .add_documents(&[chunk(1, "b", "x")], &[vec![1.0, 0.0, 0.0]], "uc_fr_01")
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_snapshot_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = DenseStore::open(dir.path()).unwrap();
            store
                .add_documents(
                    &[chunk(0, "persisted", "fraud")],
                    &[vec![0.6, 0.8]],
                    "uc_fr_01",
                )
                .unwrap();
        }
        let reopened = DenseStore::open(dir.path()).unwrap();
        assert_eq!(reopened.list_collections().unwrap(), vec!["uc_fr_01"]);
        let results = reopened.search(&[0.6, 0.8], 1, "uc_fr_01", None).unwrap();
        assert_eq!(results[0].chunk.text, "persisted");
    }

    #[test]
    fn test_delete_collection_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = DenseStore::open(dir.path()).unwrap();
        store
            .add_documents(&[chunk(0, "a", "x")], &[vec![1.0]], "uc_fr_01")
            .unwrap();
        assert!(dir.path().join("uc_fr_01.index").exists());

        assert!(store.delete_collection("uc_fr_01").unwrap());
        assert!(!dir.path().join("uc_fr_01.index").exists());
        assert!(!dir.path().join("uc_fr_01_metadata.json").exists());
        assert!(store.list_collections().unwrap().is_empty());
        // Deleting again reports absence.
        assert!(!store.delete_collection("uc_fr_01").unwrap());
    }

    #[test]
    fn test_search_missing_collection_is_empty() {
        let (_dir, store) = store();
        assert!(store.search(&[1.0], 5, "nope", None).unwrap().is_empty());
    }
}
