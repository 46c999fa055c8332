//! Token accounting.
//!
//! Counts use the cl100k_base tokenizer when it loads; otherwise the
//! estimate is `ceil(1.3 × word_count)`. Callers treat counts as an upper
//! bound for packing, never for API billing.

use tiktoken_rs::CoreBPE;
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;

/// Token counter with a deterministic word-based fallback.
pub struct TokenAccountant {
    bpe: Option<CoreBPE>,
}

impl TokenAccountant {
    /// Build an accountant, attempting to load the tokenizer once.
    pub fn new() -> Self {
        let bpe = match tiktoken_rs::cl100k_base() {
            Ok(bpe) => Some(bpe),
            Err(e) => {
                warn!(error = %e, "tiktoken unavailable; using word-based token estimates");
                None
            }
        };
        Self { bpe }
    }

    /// Whether real tokenization is in use (vs the word estimate).
    pub fn exact(&self) -> bool {
        self.bpe.is_some()
    }

    /// Count tokens in `text`.
    pub fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        match &self.bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => Self::estimate(text),
        }
    }

    /// Word-based estimate: `ceil(1.3 × word_count)`.
    pub fn estimate(text: &str) -> usize {
        let words = text.unicode_words().count();
        ((words as f64) * 1.3).ceil() as usize
    }
}

impl Default for TokenAccountant {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_counts_zero() {
        let t = TokenAccountant::new();
        assert_eq!(t.count(""), 0);
    }

    #[test]
    fn test_count_grows_with_text() {
        let t = TokenAccountant::new();
        let short = t.count("one two three");
        let long = t.count("one two three four five six seven eight nine ten");
        assert!(long > short);
        assert!(short > 0);
    }

    #[test]
    fn test_estimate_is_1_3x_words() {
        assert_eq!(TokenAccountant::estimate("a b c d"), 6); // ceil(4 * 1.3)
        assert_eq!(TokenAccountant::estimate("hello"), 2); // ceil(1.3)
        assert_eq!(TokenAccountant::estimate(""), 0);
    }
}
