//! Embedded SQLite backend.
//!
//! The fallback when neither the dense index nor an external service is
//! configured. One `vectors` table holds every collection; embeddings are
//! raw little-endian `f32` blobs with their shape as a JSON array. Rows
//! written by older deployments lack `embedding_shape` (they were pickled);
//! those are never deserialized: they are skipped with a warning telling
//! the operator to re-index.
//!
//! Similarity is cosine computed in-process over all rows of the
//! collection. Acceptable up to roughly 100K vectors per collection.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use bankflow::core::documents::ScoredChunk;
use bankflow::{Chunk, Error, Result};
use rusqlite::{params, Connection};
use serde_json::Value;
use tracing::warn;

use crate::{cosine_similarity, matches_filters, Filters};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS vectors (
    collection TEXT NOT NULL,
    chunk_id TEXT NOT NULL,
    text TEXT NOT NULL,
    metadata_json TEXT NOT NULL DEFAULT '{}',
    embedding_blob BLOB NOT NULL,
    embedding_shape TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(collection, chunk_id)
);
CREATE INDEX IF NOT EXISTS idx_vectors_collection ON vectors(collection);
";

/// SQLite-backed vector store.
pub struct SqliteVectorStore {
    conn: Arc<Mutex<Connection>>,
}

fn lock_err<T>(e: std::sync::PoisonError<T>) -> Error {
    Error::data(format!("Vector store lock poisoned: {e}"))
}

fn encode_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_blob(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

impl SqliteVectorStore {
    /// Open (or create) `vectors.db`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| Error::data(format!("Failed to open vector DB: {e}")))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| Error::data(format!("Failed to initialize vector schema: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::data(format!("Failed to open vector DB: {e}")))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| Error::data(format!("Failed to initialize vector schema: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn add_documents(
        &self,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
        collection: &str,
    ) -> Result<usize> {
        let dimension = embeddings[0].len();
        let conn = self.conn.lock().map_err(lock_err)?;

        // Dimensionality within a collection is uniform.
        let existing: Option<String> = conn
            .query_row(
                "SELECT embedding_shape FROM vectors
                 WHERE collection = ?1 AND embedding_shape IS NOT NULL LIMIT 1",
                params![collection],
                |r| r.get(0),
            )
            .ok();
        if let Some(shape) = existing {
            if shape != format!("[{dimension}]") {
                return Err(Error::validation(format!(
                    "Embedding dimension mismatch for '{collection}': collection has {shape}, got [{dimension}]"
                )));
            }
        }

        let now = chrono::Utc::now().to_rfc3339();
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            if embedding.len() != dimension {
                return Err(Error::validation(format!(
                    "Embedding dimension mismatch: expected {dimension}, got {}",
                    embedding.len()
                )));
            }
            conn.execute(
                "INSERT OR REPLACE INTO vectors
                     (collection, chunk_id, text, metadata_json, embedding_blob, embedding_shape, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    collection,
                    chunk.chunk_id,
                    chunk.text,
                    serde_json::to_string(&chunk.metadata)?,
                    encode_blob(embedding),
                    format!("[{dimension}]"),
                    now,
                ],
            )
            .map_err(|e| Error::data(format!("Vector insert failed: {e}")))?;
        }
        Ok(chunks.len())
    }

    pub(crate) fn search(
        &self,
        query: &[f32],
        top_k: usize,
        collection: &str,
        filters: Option<&Filters>,
    ) -> Result<Vec<ScoredChunk>> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let mut stmt = conn
            .prepare(
                "SELECT chunk_id, text, metadata_json, embedding_blob, embedding_shape
                 FROM vectors WHERE collection = ?1",
            )
            .map_err(|e| Error::data(format!("Vector query failed: {e}")))?;

        let rows = stmt
            .query_map(params![collection], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, Vec<u8>>(3)?,
                    r.get::<_, Option<String>>(4)?,
                ))
            })
            .map_err(|e| Error::data(format!("Vector query failed: {e}")))?;

        let mut scored = Vec::new();
        let mut legacy_skipped = 0usize;
        for row in rows {
            let (chunk_id, text, metadata_json, blob, shape) =
                row.map_err(|e| Error::data(format!("Vector row read failed: {e}")))?;

            // Legacy rows predate the raw-blob format and were pickled.
            // Refuse to interpret them; re-ingestion rewrites them safely.
            if shape.is_none() {
                legacy_skipped += 1;
                continue;
            }

            let embedding = decode_blob(&blob);
            if embedding.len() != query.len() {
                continue;
            }

            let metadata: HashMap<String, Value> = serde_json::from_str(&metadata_json)
                .unwrap_or_else(|e| {
                    warn!(chunk_id = %chunk_id, error = %e, "Unreadable chunk metadata; using empty metadata");
                    HashMap::new()
                });
            if !matches_filters(&metadata, filters) {
                continue;
            }

            let token_count = metadata
                .get("token_count")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize;
            let chunk_index = chunk_id
                .rsplit('_')
                .next()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            scored.push(ScoredChunk {
                chunk: Chunk {
                    chunk_id,
                    text,
                    metadata,
                    token_count,
                    chunk_index,
                },
                score: cosine_similarity(query, &embedding),
            });
        }

        if legacy_skipped > 0 {
            warn!(
                collection,
                legacy_skipped,
                "Skipped legacy vector rows without embedding_shape; re-index this collection"
            );
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    pub(crate) fn delete_collection(&self, collection: &str) -> Result<bool> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let removed = conn
            .execute("DELETE FROM vectors WHERE collection = ?1", params![collection])
            .map_err(|e| Error::data(format!("Vector deletion failed: {e}")))?;
        Ok(removed > 0)
    }

    pub(crate) fn list_collections(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT collection FROM vectors ORDER BY collection")
            .map_err(|e| Error::data(format!("Vector query failed: {e}")))?;
        let names = stmt
            .query_map([], |r| r.get::<_, String>(0))
            .map_err(|e| Error::data(format!("Vector query failed: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::data(format!("Vector row read failed: {e}")))?;
        Ok(names)
    }

    pub(crate) fn count(&self, collection: &str) -> Result<usize> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM vectors WHERE collection = ?1",
                params![collection],
                |r| r.get(0),
            )
            .map_err(|e| Error::data(format!("Vector count failed: {e}")))?;
        Ok(count as usize)
    }
}
