//! RAG pipeline for BankFlow.
//!
//! The query loop has eight steps with deterministic branches: cache probe,
//! pre-retrieval analysis, query embedding, vector search, post-retrieval
//! (rerank, filter, dedupe, context assembly), generation, evaluation, and
//! cache store. Every fallback is explicit: a missing LLM returns the
//! assembled context verbatim, an empty retrieval returns the no-results
//! sentinel, and the embedding method is fixed at construction: it never
//! fails over per call.

mod embedding_pipeline;
mod evaluator;
mod pipeline;
mod post_retrieval;
mod pre_retrieval;

pub use embedding_pipeline::{EmbeddingPipeline, HashingTfIdfEmbeddings, TFIDF_DIMENSION};
pub use evaluator::{evaluate_response, EvalScores};
pub use pipeline::{IngestSummary, RagConfig, RagPipeline, RagResponse, SourceRef, NO_RESULTS_RESPONSE};
pub use post_retrieval::{jaccard_similarity, PostRetrieval};
pub use pre_retrieval::{Intent, PreRetrieval, QueryAnalysis};
