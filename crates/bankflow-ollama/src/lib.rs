//! Ollama client for BankFlow.
//!
//! One HTTP client covers the platform's three LLM touchpoints: text
//! generation (RAG answers, text2sql), embeddings, and an availability
//! probe. Timeouts are per operation (120 s for generation, 30 s for
//! embeddings, 3 s for the probe) and every failure surfaces as
//! `Error::ExternalService` so the taxonomy handler maps it to 502.

mod client;
mod embeddings;
pub mod text2sql;

pub use client::{GenerateOptions, OllamaClient};
pub use embeddings::OllamaEmbeddings;
