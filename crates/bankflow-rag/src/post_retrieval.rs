//! Post-retrieval: rerank, score filter, dedupe, context assembly.

use std::collections::HashSet;

use bankflow::core::documents::ScoredChunk;
use bankflow_splitters::TokenAccountant;

/// Default rerank floor.
pub const DEFAULT_SCORE_FLOOR: f32 = 0.2;
/// Jaccard overlap at which a chunk counts as a duplicate.
pub const DEDUPE_THRESHOLD: f64 = 0.9;
/// Default context token budget.
pub const DEFAULT_CONTEXT_BUDGET: usize = 3000;

/// Word-set Jaccard similarity.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let set_a: HashSet<String> = words(a);
    let set_b: HashSet<String> = words(b);
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

fn words(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Post-retrieval processor.
pub struct PostRetrieval {
    score_floor: f32,
    context_budget: usize,
    tokens: TokenAccountant,
}

impl PostRetrieval {
    pub fn new(score_floor: f32, context_budget: usize) -> Self {
        Self {
            score_floor,
            context_budget,
            tokens: TokenAccountant::new(),
        }
    }

    /// Rerank by blending retrieval similarity with lexical overlap:
    /// `0.5 × original + 0.5 × jaccard(query, chunk)`. (With a
    /// cross-encoder available the blend would be 0.3/0.7; none is
    /// bundled, so the lexical path is the only one.)
    pub fn rerank(&self, query: &str, mut chunks: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
        for scored in &mut chunks {
            let lexical = jaccard_similarity(query, &scored.chunk.text) as f32;
            scored.score = 0.5 * scored.score + 0.5 * lexical;
        }
        chunks.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        chunks
    }

    /// Drop chunks below the score floor.
    pub fn filter(&self, chunks: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
        chunks
            .into_iter()
            .filter(|c| c.score >= self.score_floor)
            .collect()
    }

    /// Pairwise dedupe: drop a chunk whose word-set Jaccard against any
    /// already-kept chunk reaches the threshold.
    pub fn dedupe(&self, chunks: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
        let mut kept: Vec<ScoredChunk> = Vec::with_capacity(chunks.len());
        for candidate in chunks {
            let duplicate = kept
                .iter()
                .any(|k| jaccard_similarity(&k.chunk.text, &candidate.chunk.text) >= DEDUPE_THRESHOLD);
            if !duplicate {
                kept.push(candidate);
            }
        }
        kept
    }

    /// Concatenate chunks under the token budget with source attribution
    /// headers: `[Source N: <basename>, relevance: 0.XX]`.
    pub fn assemble_context(&self, chunks: &[ScoredChunk]) -> String {
        let mut out = String::new();
        let mut budget = 0usize;
        for (i, scored) in chunks.iter().enumerate() {
            let basename = scored
                .chunk
                .source()
                .map(|s| {
                    std::path::Path::new(s)
                        .file_name()
                        .map(|f| f.to_string_lossy().to_string())
                        .unwrap_or_else(|| s.to_string())
                })
                .unwrap_or_else(|| "unknown".to_string());
            let block = format!(
                "[Source {}: {}, relevance: {:.2}]\n{}\n\n",
                i + 1,
                basename,
                scored.score,
                scored.chunk.text.trim()
            );
            let cost = self.tokens.count(&block);
            if budget + cost > self.context_budget && budget > 0 {
                break;
            }
            budget += cost;
            out.push_str(&block);
        }
        out.trim_end().to_string()
    }
}

impl Default for PostRetrieval {
    fn default() -> Self {
        Self::new(DEFAULT_SCORE_FLOOR, DEFAULT_CONTEXT_BUDGET)
    }
}
