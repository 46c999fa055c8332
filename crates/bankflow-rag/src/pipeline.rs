//! The RAG query loop and ingestion.

use std::path::Path;
use std::sync::Arc;

use bankflow::core::documents::ScoredChunk;
use bankflow::core::sanitize::validate_use_case_key;
use bankflow::{Chunk, Error, Result};
use bankflow_cache::RagCache;
use bankflow_ollama::{GenerateOptions, OllamaClient};
use bankflow_splitters::{ChunkStrategy, Chunker};
use bankflow_vectorstores::VectorBackend;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::embedding_pipeline::EmbeddingPipeline;
use crate::evaluator::{evaluate_response, EvalScores};
use crate::post_retrieval::PostRetrieval;
use crate::pre_retrieval::PreRetrieval;

/// Deterministic sentinel returned when retrieval comes back empty.
pub const NO_RESULTS_RESPONSE: &str =
    "Could not find relevant information for this query in the indexed collections.";

const GROUNDING_SYSTEM_PROMPT: &str = "You are a banking analytics assistant. \
Answer using ONLY the provided context. If the context does not contain the answer, \
say so plainly. Cite the source numbers you used. Never invent figures, accounts, or policies.";

const EMBED_BATCH: usize = 32;

/// Pipeline tunables.
#[derive(Debug, Clone)]
pub struct RagConfig {
    pub top_k: usize,
    pub score_floor: f32,
    pub context_budget: usize,
    pub cache_ttl_secs: i64,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub strategy: ChunkStrategy,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            score_floor: crate::post_retrieval::DEFAULT_SCORE_FLOOR,
            context_budget: crate::post_retrieval::DEFAULT_CONTEXT_BUDGET,
            cache_ttl_secs: bankflow_cache::DEFAULT_TTL_SECS,
            chunk_size: 512,
            chunk_overlap: 50,
            strategy: ChunkStrategy::Recursive,
        }
    }
}

/// Source attribution entry in a response.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub chunk_id: String,
    pub source: String,
    pub use_case: String,
    pub score: f32,
    pub snippet: String,
}

/// Full query result.
#[derive(Debug, Clone, Serialize)]
pub struct RagResponse {
    pub response: String,
    pub sources: Vec<SourceRef>,
    pub scores: Option<EvalScores>,
    pub metadata: Value,
}

/// Ingestion summary.
#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub use_case: String,
    pub files: usize,
    pub chunks: usize,
    pub method: &'static str,
}

/// The assembled pipeline.
pub struct RagPipeline {
    store: Arc<VectorBackend>,
    embedder: Arc<EmbeddingPipeline>,
    client: Arc<OllamaClient>,
    cache: Arc<RagCache>,
    pre: PreRetrieval,
    post: PostRetrieval,
    chunker: Chunker,
    config: RagConfig,
}

impl RagPipeline {
    pub fn new(
        store: Arc<VectorBackend>,
        embedder: Arc<EmbeddingPipeline>,
        client: Arc<OllamaClient>,
        cache: Arc<RagCache>,
        config: RagConfig,
    ) -> Self {
        let post = PostRetrieval::new(config.score_floor, config.context_budget);
        let chunker = Chunker::new(config.strategy, config.chunk_size, config.chunk_overlap);
        Self {
            store,
            embedder,
            client,
            cache,
            pre: PreRetrieval::new(),
            post,
            chunker,
            config,
        }
    }

    /// Selected embedding method name.
    pub fn embedding_method(&self) -> &'static str {
        self.embedder.method()
    }

    /// The eight-step query loop.
    pub async fn query(&self, query: &str, use_case_filter: Option<&str>) -> Result<RagResponse> {
        // 1. Cache probe on the normalized query.
        let normalized = query.trim().to_lowercase();
        if let Ok(Some(hit)) = self.cache.get_query(&normalized) {
            debug!(hit_count = hit.hit_count, "Query served from cache");
            return Ok(RagResponse {
                response: hit.response,
                sources: Vec::new(),
                scores: None,
                metadata: json!({"cached": true, "hit_count": hit.hit_count}),
            });
        }

        // 2. Pre-retrieval analysis.
        let analysis = self.pre.analyze(query);

        // 3. Query embedding. No embedding, no retrieval.
        let embedding = match self.embedder.embed_query(&analysis.rewritten).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Could not embed query");
                return Ok(RagResponse {
                    response: "Could not generate an embedding for this query.".to_string(),
                    sources: Vec::new(),
                    scores: None,
                    metadata: json!({"error": e.to_string(), "embedding_failed": true}),
                });
            }
        };

        // 4. Search one collection or all of them, 2×top_k each.
        let collections = match use_case_filter {
            Some(uc) => vec![uc.to_string()],
            None => self.store.list_collections().await?,
        };
        let mut candidates: Vec<ScoredChunk> = Vec::new();
        for collection in &collections {
            let mut hits = self
                .store
                .search(
                    &embedding,
                    self.config.top_k * 2,
                    collection,
                    analysis.filters.as_ref(),
                )
                .await?;
            candidates.append(&mut hits);
        }
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(self.config.top_k * 2);

        // 5. Post-retrieval: rerank, floor, dedupe, trim.
        let reranked = self.post.rerank(query, candidates);
        let filtered = self.post.filter(reranked);
        let mut kept = self.post.dedupe(filtered);
        kept.truncate(self.config.top_k);

        if kept.is_empty() {
            return Ok(RagResponse {
                response: NO_RESULTS_RESPONSE.to_string(),
                sources: Vec::new(),
                scores: None,
                metadata: json!({
                    "no_results": true,
                    "intent": analysis.intent.as_str(),
                    "collections_searched": collections.len(),
                }),
            });
        }

        let context = self.post.assemble_context(&kept);

        // 6. Generate; an unreachable LLM degrades to the raw context.
        let prompt = format!("Context:\n{context}\n\nQuestion: {query}\n\nAnswer:");
        let (response, generated) = match self
            .client
            .generate(&prompt, Some(GROUNDING_SYSTEM_PROMPT), &GenerateOptions::default())
            .await
        {
            Ok(text) if !text.trim().is_empty() => (text, true),
            Ok(_) => (context.clone(), false),
            Err(e) => {
                warn!(error = %e, "Generation unavailable; returning assembled context");
                (context.clone(), false)
            }
        };

        // 7. Evaluate.
        let scores = evaluate_response(query, &response, &context);

        // 8. Cache the triple.
        if let Err(e) =
            self.cache
                .store_query(&normalized, &response, Some(&embedding), self.config.cache_ttl_secs)
        {
            warn!(error = %e, "Failed to cache query response");
        }

        let sources = kept
            .iter()
            .map(|s| SourceRef {
                chunk_id: s.chunk.chunk_id.clone(),
                source: s.chunk.source().unwrap_or("unknown").to_string(),
                use_case: s
                    .chunk
                    .metadata
                    .get("use_case")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                score: s.score,
                snippet: s.chunk.text.chars().take(200).collect(),
            })
            .collect();

        Ok(RagResponse {
            response,
            sources,
            scores: Some(scores),
            metadata: json!({
                "cached": false,
                "generated": generated,
                "intent": analysis.intent.as_str(),
                "collections_searched": collections.len(),
                "embedding_method": self.embedder.method(),
            }),
        })
    }

    /// Chunk, embed, and index every data file in a use case directory.
    pub async fn ingest_use_case(&self, use_case_key: &str, dir: &Path) -> Result<IngestSummary> {
        if !validate_use_case_key(use_case_key) {
            return Err(Error::validation(format!(
                "Invalid use case key: '{use_case_key}'"
            )));
        }
        if !dir.is_dir() {
            return Err(Error::not_found(format!(
                "Data directory not found: {}",
                dir.display()
            )));
        }

        let domain = domain_for_key(use_case_key);
        let mut all_chunks: Vec<Chunk> = Vec::new();
        let mut files = 0usize;

        let mut entries: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && is_ingestible(p))
            .collect();
        entries.sort();

        for path in entries {
            match self.chunker.chunk_file(&path) {
                Ok(chunks) => {
                    files += 1;
                    all_chunks.extend(chunks.into_iter().map(|c| {
                        c.with_metadata("use_case", use_case_key)
                            .with_metadata("domain", domain.clone())
                    }));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable file during ingestion");
                }
            }
        }

        if all_chunks.is_empty() {
            return Ok(IngestSummary {
                use_case: use_case_key.to_string(),
                files,
                chunks: 0,
                method: self.embedder.method(),
            });
        }

        for batch in all_chunks.chunks(EMBED_BATCH) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embeddings = self.embedder.embed_documents(&texts).await?;
            self.store
                .add_documents(batch, &embeddings, use_case_key)
                .await?;
        }

        info!(
            use_case = use_case_key,
            files,
            chunks = all_chunks.len(),
            "Ingestion complete"
        );
        Ok(IngestSummary {
            use_case: use_case_key.to_string(),
            files,
            chunks: all_chunks.len(),
            method: self.embedder.method(),
        })
    }

    /// Run a set of queries and aggregate the quality scores.
    pub async fn batch_evaluate(&self, queries: &[String]) -> Result<Value> {
        let mut individual = Vec::with_capacity(queries.len());
        let mut by_metric: std::collections::BTreeMap<&str, Vec<f64>> = Default::default();

        for query in queries {
            let result = self.query(query, None).await?;
            if let Some(scores) = result.scores {
                for (name, value) in [
                    ("relevance", scores.relevance),
                    ("groundedness", scores.groundedness),
                    ("completeness", scores.completeness),
                    ("hallucination", scores.hallucination),
                    ("coherence", scores.coherence),
                ] {
                    by_metric.entry(name).or_default().push(value);
                }
            }
            individual.push(json!({
                "query": query,
                "response": result.response,
                "scores": result.scores,
                "metadata": result.metadata,
            }));
        }

        let mut aggregated = serde_json::Map::new();
        for (name, values) in by_metric {
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            let variance =
                values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            aggregated.insert(
                name.to_string(),
                json!({"mean": mean, "std": variance.sqrt(), "min": min, "max": max}),
            );
        }

        Ok(json!({
            "n_queries": queries.len(),
            "aggregated_metrics": aggregated,
            "individual_results": individual,
        }))
    }
}

fn is_ingestible(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("csv" | "json" | "txt" | "md" | "log")
    )
}

/// Domain tag derived from the use-case key prefix, e.g. `uc_fr_01` →
/// "fraud". Stamped onto chunk metadata so domain filters can match.
fn domain_for_key(use_case_key: &str) -> String {
    let lower = use_case_key.to_lowercase();
    for segment in lower.split(['_', '-']) {
        let tag = match segment {
            "fr" | "fraud" => Some("fraud"),
            "cr" | "credit" => Some("credit"),
            "aml" => Some("aml"),
            "col" | "collections" => Some("collections"),
            "gov" | "governance" => Some("governance"),
            _ => None,
        };
        if let Some(tag) = tag {
            return tag.to_string();
        }
    }
    "general".to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::embedding_pipeline::HashingTfIdfEmbeddings;
    use bankflow_vectorstores::SqliteVectorStore;

    fn pipeline() -> RagPipeline {
        let store = Arc::new(VectorBackend::Sqlite(SqliteVectorStore::in_memory().unwrap()));
        let cache = Arc::new(RagCache::in_memory().unwrap());
        let embedder = Arc::new(EmbeddingPipeline::with_embedder(
            Arc::new(HashingTfIdfEmbeddings::new()),
            Arc::clone(&cache),
        ));
        // Nothing listens on the discard port; generation degrades to context.
        let client = Arc::new(OllamaClient::new("http://127.0.0.1:9", "llama3.2"));
        let mut config = RagConfig::default();
        config.score_floor = 0.05;
        RagPipeline::new(store, embedder, client, cache, config)
    }

    fn seed_docs(dir: &tempfile::TempDir) {
        std::fs::write(
            dir.path().join("policy.md"),
            "Fraud detection uses transaction monitoring rules. Wire transfers above \
thresholds are escalated to analysts for review. Chargeback disputes feed monthly reporting.",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("kyc.txt"),
            "Customer onboarding requires identity verification. Sanctions lists are \
checked nightly against the customer base.",
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_no_results_sentinel() {
        let rag = pipeline();
        let out = rag.query("what is data governance?", None).await.unwrap();
        assert_eq!(out.response, NO_RESULTS_RESPONSE);
        assert_eq!(out.metadata["no_results"], json!(true));
        assert!(out.sources.is_empty());
        assert!(out.scores.is_none());
    }

    #[tokio::test]
    async fn test_ingest_and_query_round_trip() {
        let rag = pipeline();
        let dir = tempfile::tempdir().unwrap();
        seed_docs(&dir);

        let summary = rag.ingest_use_case("uc_fr_01", dir.path()).await.unwrap();
        assert_eq!(summary.files, 2);
        assert!(summary.chunks >= 2);

        let out = rag
            .query("wire transaction monitoring rules", Some("uc_fr_01"))
            .await
            .unwrap();
        assert_ne!(out.response, NO_RESULTS_RESPONSE);
        assert!(!out.sources.is_empty());
        // LLM is unreachable, so the context itself is the response.
        assert_eq!(out.metadata["generated"], json!(false));
        assert!(out.response.contains("[Source 1"));
        assert!(out.scores.is_some());

        // Sources carry attribution.
        assert_eq!(out.sources[0].use_case, "uc_fr_01");
        assert!(out.sources[0].score > 0.0);
    }

    #[tokio::test]
    async fn test_second_query_is_cached() {
        let rag = pipeline();
        let dir = tempfile::tempdir().unwrap();
        seed_docs(&dir);
        rag.ingest_use_case("uc_fr_01", dir.path()).await.unwrap();

        let first = rag
            .query("transaction monitoring thresholds", Some("uc_fr_01"))
            .await
            .unwrap();
        assert_eq!(first.metadata["cached"], json!(false));

        let second = rag
            .query("Transaction Monitoring Thresholds", Some("uc_fr_01"))
            .await
            .unwrap();
        assert_eq!(second.metadata["cached"], json!(true));
        assert_eq!(second.response, first.response);
    }

    #[tokio::test]
    async fn test_no_results_is_not_cached() {
        let rag = pipeline();
        let out = rag.query("unknown topic", None).await.unwrap();
        assert_eq!(out.metadata["no_results"], json!(true));
        let again = rag.query("unknown topic", None).await.unwrap();
        assert_eq!(again.metadata["no_results"], json!(true));
        assert!(again.metadata.get("cached").is_none());
    }

    #[tokio::test]
    async fn test_invalid_use_case_key_rejected() {
        let rag = pipeline();
        let dir = tempfile::tempdir().unwrap();
        let err = rag.ingest_use_case("../evil", dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_batch_evaluate_aggregates() {
        let rag = pipeline();
        let dir = tempfile::tempdir().unwrap();
        seed_docs(&dir);
        rag.ingest_use_case("uc_fr_01", dir.path()).await.unwrap();

        let out = rag
            .batch_evaluate(&[
                "fraud monitoring rules".to_string(),
                "sanctions screening cadence".to_string(),
            ])
            .await
            .unwrap();
        assert_eq!(out["n_queries"], 2);
        assert_eq!(out["individual_results"].as_array().unwrap().len(), 2);
        if let Some(relevance) = out["aggregated_metrics"].get("relevance") {
            assert!(relevance["mean"].as_f64().unwrap() >= 0.0);
        }
    }

    #[test]
    fn test_domain_for_key() {
        assert_eq!(domain_for_key("uc_fr_01_fraud_mgmt"), "fraud");
        assert_eq!(domain_for_key("UC-AML-03"), "aml");
        assert_eq!(domain_for_key("uc_hr_12"), "general");
    }
}
