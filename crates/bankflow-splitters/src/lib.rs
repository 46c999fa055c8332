//! Text splitters for BankFlow RAG ingestion.
//!
//! Splits documents into [`Chunk`]s at token granularity. Four strategies
//! are available, selected at construction:
//!
//! - [`ChunkStrategy::Fixed`]: sliding token window with overlap
//! - [`ChunkStrategy::Recursive`]: paragraphs, then sentences, then words
//! - [`ChunkStrategy::Sentence`]: sentence split + greedy packing
//! - [`ChunkStrategy::Semantic`]: degrades to Sentence (no similarity model
//!   is bundled) with an explicit warning
//!
//! File dispatch is by extension: `.csv` renders rows as
//! `"col: val | col: val"`, `.json` flattens nested keys with `_` and
//! greedy-packs, everything text-like takes the plain text path.
//!
//! # Example
//!
//! ```
//! use bankflow_splitters::{Chunker, ChunkStrategy};
//!
//! let chunker = Chunker::new(ChunkStrategy::Sentence, 128, 16);
//! let chunks = chunker.chunk_text("First sentence. Second one!", "notes.txt");
//! assert!(!chunks.is_empty());
//! ```

mod dispatch;
mod strategies;
mod tokens;

pub use dispatch::detect_file_kind;
pub use strategies::split_sentences;
pub use tokens::TokenAccountant;

use bankflow::{Chunk, Result};
use std::path::Path;

/// Chunking strategy, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStrategy {
    /// Sliding window of `chunk_size` tokens with `chunk_overlap` overlap.
    Fixed,
    /// Blank-line paragraphs, oversize paragraphs split on sentences, then
    /// words, greedy-packed back into budget-sized chunks.
    Recursive,
    /// Sentence-boundary split, greedy-packed.
    Sentence,
    /// Degrades to [`ChunkStrategy::Sentence`]; no similarity model bundled.
    Semantic,
}

impl ChunkStrategy {
    /// Parse a strategy name ("fixed", "recursive", "sentence", "semantic").
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "recursive" => Ok(Self::Recursive),
            "sentence" => Ok(Self::Sentence),
            "semantic" => Ok(Self::Semantic),
            other => Err(bankflow::Error::validation(format!(
                "Unknown chunking strategy: '{other}'"
            ))),
        }
    }
}

/// Deterministic document chunker.
pub struct Chunker {
    strategy: ChunkStrategy,
    chunk_size: usize,
    chunk_overlap: usize,
    tokens: TokenAccountant,
}

impl Chunker {
    /// Build a chunker. `chunk_overlap` is clamped below `chunk_size`.
    pub fn new(strategy: ChunkStrategy, chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            strategy,
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
            tokens: TokenAccountant::new(),
        }
    }

    /// The configured strategy.
    pub fn strategy(&self) -> ChunkStrategy {
        self.strategy
    }

    /// Token budget per chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Token overlap between consecutive fixed-window chunks.
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// The token accountant backing this chunker.
    pub fn tokens(&self) -> &TokenAccountant {
        &self.tokens
    }

    /// Chunk raw text attributed to `source`.
    pub fn chunk_text(&self, text: &str, source: &str) -> Vec<Chunk> {
        let pieces = match self.strategy {
            ChunkStrategy::Fixed => {
                strategies::fixed_window(text, self.chunk_size, self.chunk_overlap, &self.tokens)
            }
            ChunkStrategy::Recursive => {
                strategies::recursive(text, self.chunk_size, &self.tokens)
            }
            ChunkStrategy::Sentence => {
                strategies::sentence_pack(text, self.chunk_size, &self.tokens)
            }
            ChunkStrategy::Semantic => {
                tracing::warn!(
                    "Semantic chunking requires a similarity model; degrading to sentence strategy"
                );
                strategies::sentence_pack(text, self.chunk_size, &self.tokens)
            }
        };

        pieces
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .enumerate()
            .map(|(i, piece)| {
                let count = self.tokens.count(&piece);
                Chunk::new(source, i, piece, count)
            })
            .collect()
    }

    /// Chunk a file, dispatching on its extension.
    ///
    /// # Errors
    ///
    /// Returns `Data` when the file cannot be read or parsed.
    pub fn chunk_file(&self, path: &Path) -> Result<Vec<Chunk>> {
        dispatch::chunk_file(self, path)
    }

    pub(crate) fn pack_lines(&self, lines: &[String], source: &str, kind: &str) -> Vec<Chunk> {
        let packed = strategies::greedy_pack(lines, self.chunk_size, &self.tokens);
        packed
            .into_iter()
            .enumerate()
            .map(|(i, piece)| {
                let count = self.tokens.count(&piece);
                Chunk::new(source, i, piece, count).with_metadata("file_type", kind)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Data governance is a critical aspect of banking operations. \
It covers availability, usability, integrity, and security.\n\n\
Key components include quality monitoring and access controls. \
Organizations must establish clear policies. Regular audits help.";

    #[test]
    fn test_strategy_parse() {
        assert_eq!(ChunkStrategy::parse("Fixed").unwrap(), ChunkStrategy::Fixed);
        assert_eq!(
            ChunkStrategy::parse("semantic").unwrap(),
            ChunkStrategy::Semantic
        );
        assert!(ChunkStrategy::parse("quantum").is_err());
    }

    #[test]
    fn test_fixed_chunks_within_budget() {
        let chunker = Chunker::new(ChunkStrategy::Fixed, 20, 5);
        let chunks = chunker.chunk_text(SAMPLE, "gov.txt");
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.token_count <= 20 + 4, "chunk over budget: {}", c.token_count);
            assert_eq!(c.source(), Some("gov.txt"));
        }
    }

    #[test]
    fn test_fixed_overlap_repeats_words() {
        let chunker = Chunker::new(ChunkStrategy::Fixed, 10, 4);
        let chunks = chunker.chunk_text(SAMPLE, "gov.txt");
        assert!(chunks.len() >= 2);
        let first_tail: Vec<&str> = chunks[0].text.split_whitespace().rev().take(2).collect();
        // Overlapping windows share their boundary words.
        assert!(first_tail.iter().any(|w| chunks[1].text.contains(*w)));
    }

    #[test]
    fn test_sentence_strategy_respects_boundaries() {
        let chunker = Chunker::new(ChunkStrategy::Sentence, 1000, 0);
        let chunks = chunker.chunk_text(SAMPLE, "gov.txt");
        // Budget is generous, everything packs into one chunk.
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("Regular audits"));
    }

    #[test]
    fn test_semantic_degrades_to_sentence() {
        let semantic = Chunker::new(ChunkStrategy::Semantic, 50, 0);
        let sentence = Chunker::new(ChunkStrategy::Sentence, 50, 0);
        let a = semantic.chunk_text(SAMPLE, "x.txt");
        let b = sentence.chunk_text(SAMPLE, "x.txt");
        assert_eq!(
            a.iter().map(|c| &c.text).collect::<Vec<_>>(),
            b.iter().map(|c| &c.text).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_recursive_splits_paragraphs() {
        let chunker = Chunker::new(ChunkStrategy::Recursive, 25, 0);
        let chunks = chunker.chunk_text(SAMPLE, "gov.txt");
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(!c.text.trim().is_empty());
        }
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        let chunker = Chunker::new(ChunkStrategy::Fixed, 64, 8);
        assert!(chunker.chunk_text("", "empty.txt").is_empty());
        assert!(chunker.chunk_text("   \n\n  ", "blank.txt").is_empty());
    }

    #[test]
    fn test_chunk_ids_are_sequential() {
        let chunker = Chunker::new(ChunkStrategy::Fixed, 10, 2);
        let chunks = chunker.chunk_text(SAMPLE, "gov.txt");
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_id, format!("gov_{i}"));
        }
    }
}
