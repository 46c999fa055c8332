//! Chunk and scored-result types shared by the splitters, vector stores,
//! and the RAG pipeline.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A segmented unit of text with metadata and a token count.
///
/// Immutable after creation. `chunk_id` is `<source-stem>_<index>` and is
/// unique within a collection; `metadata` always carries a `source` key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique id within its collection.
    pub chunk_id: String,
    /// Chunk text content.
    pub text: String,
    /// Key-value metadata; includes `source` and any domain tags.
    pub metadata: HashMap<String, Value>,
    /// Token count as reported by the token accountant (upper bound).
    pub token_count: usize,
    /// Position of this chunk within its source document.
    pub chunk_index: usize,
}

impl Chunk {
    /// Build a chunk, stamping `source` into the metadata and deriving the
    /// chunk id from the source stem and index.
    pub fn new(source: &str, index: usize, text: String, token_count: usize) -> Self {
        let stem = std::path::Path::new(source)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(source);
        let mut metadata = HashMap::new();
        metadata.insert("source".to_string(), Value::String(source.to_string()));
        Self {
            chunk_id: format!("{stem}_{index}"),
            text,
            metadata,
            token_count,
            chunk_index: index,
        }
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The `source` metadata value, if present.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(Value::as_str)
    }
}

/// A chunk paired with a retrieval similarity or rerank score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}
