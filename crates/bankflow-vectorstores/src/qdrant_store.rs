//! External collection service backend (Qdrant).
//!
//! Collections are created on demand with cosine distance, so the scores
//! Qdrant returns are already similarities. Point ids are UUIDv5 of the
//! chunk id, which makes `add_documents` a true upsert. Metadata filters
//! are applied client-side after retrieval to keep the filter contract
//! identical across backends.

use bankflow::core::documents::ScoredChunk;
use bankflow::{Chunk, Error, Result};
use qdrant_client::qdrant::{
    value::Kind, CreateCollectionBuilder, Distance, PointStruct, SearchPointsBuilder,
    UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use tracing::debug;
use uuid::Uuid;

use crate::{matches_filters, Filters};

/// Over-fetch factor so client-side filtering still fills `top_k`.
const FILTER_FETCH_FACTOR: usize = 4;

/// Qdrant-backed store.
pub struct QdrantStore {
    client: Qdrant,
}

fn qdrant_err(context: &str, e: impl std::fmt::Display) -> Error {
    Error::external(format!("{context}: {e}"))
}

impl QdrantStore {
    /// Connect to the service. Connection problems surface on first call.
    pub fn connect(url: &str) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| qdrant_err("Failed to build Qdrant client", e))?;
        Ok(Self { client })
    }

    async fn ensure_collection(&self, collection: &str, dimension: usize) -> Result<()> {
        let exists = self
            .client
            .collection_exists(collection)
            .await
            .map_err(|e| qdrant_err("Qdrant collection check failed", e))?;
        if exists {
            return Ok(());
        }
        self.client
            .create_collection(
                CreateCollectionBuilder::new(collection)
                    .vectors_config(VectorParamsBuilder::new(dimension as u64, Distance::Cosine)),
            )
            .await
            .map_err(|e| qdrant_err("Qdrant collection creation failed", e))?;
        debug!(collection, dimension, "Created Qdrant collection");
        Ok(())
    }

    pub(crate) async fn add_documents(
        &self,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
        collection: &str,
    ) -> Result<usize> {
        self.ensure_collection(collection, embeddings[0].len()).await?;

        let mut points = Vec::with_capacity(chunks.len());
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            let mut payload = Payload::new();
            payload.insert("chunk_json", serde_json::to_string(chunk)?);
            let point_id = Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk.chunk_id.as_bytes());
            points.push(PointStruct::new(
                point_id.to_string(),
                embedding.clone(),
                payload,
            ));
        }

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, points))
            .await
            .map_err(|e| qdrant_err("Qdrant upsert failed", e))?;
        Ok(chunks.len())
    }

    pub(crate) async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        collection: &str,
        filters: Option<&Filters>,
    ) -> Result<Vec<ScoredChunk>> {
        let exists = self
            .client
            .collection_exists(collection)
            .await
            .map_err(|e| qdrant_err("Qdrant collection check failed", e))?;
        if !exists {
            return Ok(Vec::new());
        }

        let fetch = if filters.is_some() {
            top_k.saturating_mul(FILTER_FETCH_FACTOR).max(top_k)
        } else {
            top_k
        };

        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(collection, query.to_vec(), fetch as u64)
                    .with_payload(true),
            )
            .await
            .map_err(|e| qdrant_err("Qdrant search failed", e))?;

        let mut out = Vec::new();
        for point in response.result {
            let Some(raw) = point.payload.get("chunk_json").and_then(|v| match &v.kind {
                Some(Kind::StringValue(s)) => Some(s.as_str()),
                _ => None,
            }) else {
                continue;
            };
            let chunk: Chunk = match serde_json::from_str(raw) {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping Qdrant point with unreadable payload");
                    continue;
                }
            };
            if !matches_filters(&chunk.metadata, filters) {
                continue;
            }
            // Cosine-configured collections return similarity directly; other
            // distance configs would need 1/(1+d) inversion here.
            out.push(ScoredChunk {
                chunk,
                score: point.score,
            });
            if out.len() >= top_k {
                break;
            }
        }
        Ok(out)
    }

    pub(crate) async fn delete_collection(&self, collection: &str) -> Result<bool> {
        let exists = self
            .client
            .collection_exists(collection)
            .await
            .map_err(|e| qdrant_err("Qdrant collection check failed", e))?;
        if !exists {
            return Ok(false);
        }
        self.client
            .delete_collection(collection)
            .await
            .map_err(|e| qdrant_err("Qdrant collection deletion failed", e))?;
        Ok(true)
    }

    pub(crate) async fn list_collections(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .list_collections()
            .await
            .map_err(|e| qdrant_err("Qdrant collection listing failed", e))?;
        let mut names: Vec<String> = response
            .collections
            .into_iter()
            .map(|c| c.name)
            .collect();
        names.sort();
        Ok(names)
    }

    pub(crate) async fn count(&self, collection: &str) -> Result<usize> {
        let info = self
            .client
            .collection_info(collection)
            .await
            .map_err(|e| qdrant_err("Qdrant collection info failed", e))?;
        Ok(info
            .result
            .and_then(|r| r.points_count)
            .unwrap_or(0) as usize)
    }
}
