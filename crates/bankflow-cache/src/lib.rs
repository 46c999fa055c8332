//! Content-addressed query/embedding cache.
//!
//! Two tables in `rag_cache.db`, keyed by `hex(sha256(text))`:
//!
//! - `query_cache`: full RAG responses with a per-entry TTL (default 3600 s)
//!   and a hit counter. A read past the TTL deletes the row and misses.
//! - `embedding_cache`: embeddings by text and model, no TTL; invalidated
//!   only by an explicit [`RagCache::clear`].
//!
//! Embedding vectors are stored as raw little-endian `f32` bytes with their
//! shape as JSON. No object-graph serialization, ever.

use std::path::Path;
use std::sync::{Arc, Mutex};

use bankflow::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Default query TTL in seconds.
pub const DEFAULT_TTL_SECS: i64 = 3600;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS query_cache (
    query_hash TEXT PRIMARY KEY,
    query_text TEXT NOT NULL,
    response TEXT NOT NULL,
    embedding_blob BLOB,
    created_at INTEGER NOT NULL,
    ttl_seconds INTEGER NOT NULL,
    hit_count INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS embedding_cache (
    text_hash TEXT PRIMARY KEY,
    text TEXT NOT NULL,
    embedding_blob BLOB NOT NULL,
    shape_json TEXT NOT NULL,
    model_name TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
";

/// A cached query row.
#[derive(Debug, Clone, Serialize)]
pub struct CachedQuery {
    pub query_text: String,
    pub response: String,
    pub embedding: Option<Vec<f32>>,
    pub created_at: i64,
    pub ttl_seconds: i64,
    pub hit_count: i64,
}

/// Cache statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub query_entries: i64,
    pub embedding_entries: i64,
    pub total_hits: i64,
    pub hit_rate: f64,
}

/// SQLite-backed RAG cache.
pub struct RagCache {
    conn: Arc<Mutex<Connection>>,
}

fn lock_err<T>(e: std::sync::PoisonError<T>) -> Error {
    Error::data(format!("Cache lock poisoned: {e}"))
}

fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Encode a vector as little-endian `f32` bytes.
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Decode little-endian `f32` bytes back into a vector.
pub fn decode_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

impl RagCache {
    /// Open (or create) the cache database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| Error::data(format!("Failed to open cache DB: {e}")))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| Error::data(format!("Failed to initialize cache schema: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory cache for tests and ephemeral use.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::data(format!("Failed to open cache DB: {e}")))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| Error::data(format!("Failed to initialize cache schema: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// `hex(sha256(text))`: the content address for both tables.
    pub fn hash(text: &str) -> String {
        hex::encode(Sha256::digest(text.as_bytes()))
    }

    /// Look up a cached response. Expired rows are deleted and miss.
    /// On hit the stored hit counter is incremented; the returned row
    /// reflects the count at lookup time.
    pub fn get_query(&self, query_text: &str) -> Result<Option<CachedQuery>> {
        let key = Self::hash(query_text);
        let conn = self.conn.lock().map_err(lock_err)?;

        let row = conn
            .query_row(
                "SELECT query_text, response, embedding_blob, created_at, ttl_seconds, hit_count
                 FROM query_cache WHERE query_hash = ?1",
                params![key],
                |r| {
                    Ok(CachedQuery {
                        query_text: r.get(0)?,
                        response: r.get(1)?,
                        embedding: r
                            .get::<_, Option<Vec<u8>>>(2)?
                            .map(|blob| decode_embedding(&blob)),
                        created_at: r.get(3)?,
                        ttl_seconds: r.get(4)?,
                        hit_count: r.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(|e| Error::data(format!("Cache read failed: {e}")))?;

        let Some(entry) = row else {
            return Ok(None);
        };

        if now_epoch() > entry.created_at + entry.ttl_seconds {
            conn.execute("DELETE FROM query_cache WHERE query_hash = ?1", params![key])
                .map_err(|e| Error::data(format!("Cache eviction failed: {e}")))?;
            debug!(query_hash = %key, "Evicted expired cache entry");
            return Ok(None);
        }

        conn.execute(
            "UPDATE query_cache SET hit_count = hit_count + 1 WHERE query_hash = ?1",
            params![key],
        )
        .map_err(|e| Error::data(format!("Cache hit-count update failed: {e}")))?;

        Ok(Some(entry))
    }

    /// Store (or refresh) a query response. Re-storing the same query
    /// resets `created_at` and bumps the hit counter.
    pub fn store_query(
        &self,
        query_text: &str,
        response: &str,
        embedding: Option<&[f32]>,
        ttl_seconds: i64,
    ) -> Result<()> {
        let key = Self::hash(query_text);
        let blob = embedding.map(encode_embedding);
        let conn = self.conn.lock().map_err(lock_err)?;
        conn.execute(
            "INSERT OR REPLACE INTO query_cache
                 (query_hash, query_text, response, embedding_blob, created_at, ttl_seconds, hit_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6,
                 COALESCE((SELECT hit_count FROM query_cache WHERE query_hash = ?1), 0) + 1)",
            params![key, query_text, response, blob, now_epoch(), ttl_seconds],
        )
        .map_err(|e| Error::data(format!("Cache write failed: {e}")))?;
        Ok(())
    }

    /// Look up a cached embedding for (text, model).
    pub fn get_embedding(&self, text: &str, model_name: &str) -> Result<Option<Vec<f32>>> {
        let key = Self::hash(text);
        let conn = self.conn.lock().map_err(lock_err)?;
        conn.query_row(
            "SELECT embedding_blob FROM embedding_cache
             WHERE text_hash = ?1 AND model_name = ?2",
            params![key, model_name],
            |r| r.get::<_, Vec<u8>>(0),
        )
        .optional()
        .map_err(|e| Error::data(format!("Embedding cache read failed: {e}")))
        .map(|blob| blob.map(|b| decode_embedding(&b)))
    }

    /// Store an embedding. No TTL; only `clear` removes it.
    pub fn store_embedding(&self, text: &str, model_name: &str, embedding: &[f32]) -> Result<()> {
        let key = Self::hash(text);
        let shape = format!("[{}]", embedding.len());
        let conn = self.conn.lock().map_err(lock_err)?;
        conn.execute(
            "INSERT OR REPLACE INTO embedding_cache
                 (text_hash, text, embedding_blob, shape_json, model_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![key, text, encode_embedding(embedding), shape, model_name, now_epoch()],
        )
        .map_err(|e| Error::data(format!("Embedding cache write failed: {e}")))?;
        Ok(())
    }

    /// Delete expired query rows. Returns the number removed.
    pub fn sweep_expired(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let removed = conn
            .execute(
                "DELETE FROM query_cache WHERE ?1 > created_at + ttl_seconds",
                params![now_epoch()],
            )
            .map_err(|e| Error::data(format!("Cache sweep failed: {e}")))?;
        if removed > 0 {
            debug!(removed, "Swept expired cache entries");
        }
        Ok(removed)
    }

    /// Empty both tables.
    pub fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(lock_err)?;
        conn.execute("DELETE FROM query_cache", [])
            .map_err(|e| Error::data(format!("Cache clear failed: {e}")))?;
        conn.execute("DELETE FROM embedding_cache", [])
            .map_err(|e| Error::data(format!("Cache clear failed: {e}")))?;
        Ok(())
    }

    /// Entry counts and hit rate.
    pub fn stats(&self) -> Result<CacheStats> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let query_entries: i64 = conn
            .query_row("SELECT COUNT(*) FROM query_cache", [], |r| r.get(0))
            .map_err(|e| Error::data(format!("Cache stats failed: {e}")))?;
        let embedding_entries: i64 = conn
            .query_row("SELECT COUNT(*) FROM embedding_cache", [], |r| r.get(0))
            .map_err(|e| Error::data(format!("Cache stats failed: {e}")))?;
        let total_hits: i64 = conn
            .query_row(
                "SELECT COALESCE(SUM(hit_count), 0) FROM query_cache",
                [],
                |r| r.get(0),
            )
            .map_err(|e| Error::data(format!("Cache stats failed: {e}")))?;
        let lookups = total_hits + query_entries;
        let hit_rate = if lookups > 0 {
            total_hits as f64 / lookups as f64
        } else {
            0.0
        };
        Ok(CacheStats {
            query_entries,
            embedding_entries,
            total_hits,
            hit_rate,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_sha256_hex() {
        let h = RagCache::hash("hello");
        assert_eq!(h.len(), 64);
        assert_eq!(
            h,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_store_twice_then_get() {
        let cache = RagCache::in_memory().unwrap();
        cache.store_query("q", "r", None, DEFAULT_TTL_SECS).unwrap();
        cache.store_query("q", "r", None, DEFAULT_TTL_SECS).unwrap();

        let hit = cache.get_query("q").unwrap().unwrap();
        assert_eq!(hit.response, "r");
        assert_eq!(hit.hit_count, 2);
    }

    #[test]
    fn test_miss_on_unknown_query() {
        let cache = RagCache::in_memory().unwrap();
        assert!(cache.get_query("nothing here").unwrap().is_none());
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = RagCache::in_memory().unwrap();
        // Negative TTL puts the deadline in the past.
        cache.store_query("old", "stale", None, -1).unwrap();
        assert!(cache.get_query("old").unwrap().is_none());
        // The expired row was deleted on read.
        assert_eq!(cache.stats().unwrap().query_entries, 0);
    }

    #[test]
    fn test_sweep_expired() {
        let cache = RagCache::in_memory().unwrap();
        cache.store_query("a", "1", None, -1).unwrap();
        cache.store_query("b", "2", None, DEFAULT_TTL_SECS).unwrap();
        assert_eq!(cache.sweep_expired().unwrap(), 1);
        assert!(cache.get_query("b").unwrap().is_some());
    }

    #[test]
    fn test_query_embedding_round_trip() {
        let cache = RagCache::in_memory().unwrap();
        let vec = vec![0.25_f32, -1.5, 3.0];
        cache
            .store_query("q", "r", Some(&vec), DEFAULT_TTL_SECS)
            .unwrap();
        let hit = cache.get_query("q").unwrap().unwrap();
        assert_eq!(hit.embedding.unwrap(), vec);
    }

    #[test]
    fn test_embedding_cache_no_ttl() {
        let cache = RagCache::in_memory().unwrap();
        let vec = vec![0.1_f32; 384];
        cache.store_embedding("some text", "tfidf", &vec).unwrap();
        assert_eq!(cache.get_embedding("some text", "tfidf").unwrap().unwrap(), vec);
        // Different model key misses.
        assert!(cache.get_embedding("some text", "ollama").unwrap().is_none());
    }

    #[test]
    fn test_clear_empties_both_tables() {
        let cache = RagCache::in_memory().unwrap();
        cache.store_query("q", "r", None, DEFAULT_TTL_SECS).unwrap();
        cache.store_embedding("t", "m", &[1.0]).unwrap();
        cache.clear().unwrap();
        let stats = cache.stats().unwrap();
        assert_eq!(stats.query_entries, 0);
        assert_eq!(stats.embedding_entries, 0);
    }

    #[test]
    fn test_persistence_across_open(){
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rag_cache.db");
        {
            let cache = RagCache::open(&path).unwrap();
            cache.store_query("q", "r", None, DEFAULT_TTL_SECS).unwrap();
        }
        let cache = RagCache::open(&path).unwrap();
        assert_eq!(cache.get_query("q").unwrap().unwrap().response, "r");
    }

    #[test]
    fn test_encode_decode_embedding() {
        let v = vec![1.5_f32, -2.25, 0.0, std::f32::consts::PI];
        assert_eq!(decode_embedding(&encode_embedding(&v)), v);
    }
}
