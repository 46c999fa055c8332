//! Splitting strategies.
//!
//! All strategies operate on per-word or per-sentence token counts from the
//! [`TokenAccountant`]. Summing per-piece counts can only overestimate the
//! count of the joined text, which keeps packed chunks within budget.

use crate::tokens::TokenAccountant;

/// Sliding token window with overlap.
pub(crate) fn fixed_window(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
    tokens: &TokenAccountant,
) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    let word_tokens: Vec<usize> = words.iter().map(|w| tokens.count(w).max(1)).collect();

    let mut out = Vec::new();
    let mut start = 0;
    while start < words.len() {
        let mut end = start;
        let mut budget = 0;
        while end < words.len() {
            let next = budget + word_tokens[end];
            if end > start && next > chunk_size {
                break;
            }
            budget = next;
            end += 1;
        }
        out.push(words[start..end].join(" "));
        if end >= words.len() {
            break;
        }

        // Step back far enough to retain `chunk_overlap` tokens.
        let mut overlap_budget = 0;
        let mut next_start = end;
        while next_start > start + 1 && overlap_budget < chunk_overlap {
            next_start -= 1;
            overlap_budget += word_tokens[next_start];
        }
        start = next_start.max(start + 1);
    }
    out
}

/// Paragraphs, then sentences, then words; pieces greedy-packed afterwards.
pub(crate) fn recursive(text: &str, chunk_size: usize, tokens: &TokenAccountant) -> Vec<String> {
    let mut pieces = Vec::new();
    for paragraph in split_paragraphs(text) {
        if tokens.count(&paragraph) <= chunk_size {
            pieces.push(paragraph);
            continue;
        }
        for sentence in split_sentences(&paragraph) {
            if tokens.count(&sentence) <= chunk_size {
                pieces.push(sentence);
            } else {
                pieces.extend(split_words(&sentence, chunk_size, tokens));
            }
        }
    }
    pack(&pieces, chunk_size, tokens, " ")
}

/// Sentence split + greedy packing.
pub(crate) fn sentence_pack(
    text: &str,
    chunk_size: usize,
    tokens: &TokenAccountant,
) -> Vec<String> {
    let sentences = split_sentences(text);
    let mut pieces = Vec::new();
    for sentence in sentences {
        if tokens.count(&sentence) <= chunk_size {
            pieces.push(sentence);
        } else {
            pieces.extend(split_words(&sentence, chunk_size, tokens));
        }
    }
    pack(&pieces, chunk_size, tokens, " ")
}

/// Greedy-pack pre-rendered lines, joining with newlines.
pub(crate) fn greedy_pack(
    lines: &[String],
    chunk_size: usize,
    tokens: &TokenAccountant,
) -> Vec<String> {
    pack(lines, chunk_size, tokens, "\n")
}

fn pack(items: &[String], chunk_size: usize, tokens: &TokenAccountant, sep: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut budget = 0;
    for item in items {
        let cost = tokens.count(item).max(1);
        if !current.is_empty() && budget + cost > chunk_size {
            out.push(std::mem::take(&mut current));
            budget = 0;
        }
        if !current.is_empty() {
            current.push_str(sep);
        }
        current.push_str(item);
        budget += cost;
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn split_paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        out.push(current.join("\n"));
    }
    out
}

fn split_words(text: &str, chunk_size: usize, tokens: &TokenAccountant) -> Vec<String> {
    fixed_window(text, chunk_size, 0, tokens)
}

/// Sentence-boundary split.
///
/// Regex-free scanner: a sentence ends at a run of `.`/`!`/`?` followed by
/// whitespace or end of input. Trailing text without terminal punctuation is
/// kept as a final sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            while let Some(&next) = chars.peek() {
                if matches!(next, '.' | '!' | '?') {
                    current.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            if chars.peek().map_or(true, |next| next.is_whitespace()) {
                let sentence = current.trim();
                if !sentence.is_empty() {
                    out.push(sentence.to_string());
                }
                current.clear();
            }
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        out.push(tail.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sentences_basic() {
        let s = split_sentences("One. Two! Three? Four");
        assert_eq!(s, vec!["One.", "Two!", "Three?", "Four"]);
    }

    #[test]
    fn test_split_sentences_ellipsis() {
        let s = split_sentences("Wait... what happened? Nothing.");
        assert_eq!(s, vec!["Wait...", "what happened?", "Nothing."]);
    }

    #[test]
    fn test_split_sentences_decimal_not_boundary() {
        // "3.14 is pi.": the dot in 3.14 is followed by a digit, not whitespace.
        let s = split_sentences("The value 3.14 is pi. Done.");
        assert_eq!(s, vec!["The value 3.14 is pi.", "Done."]);
    }

    #[test]
    fn test_split_paragraphs() {
        let p = split_paragraphs("a\nb\n\nc\n\n\nd");
        assert_eq!(p, vec!["a\nb", "c", "d"]);
    }

    #[test]
    fn test_pack_respects_budget() {
        let tokens = TokenAccountant::new();
        let items: Vec<String> = (0..10).map(|i| format!("item number {i}")).collect();
        let packed = pack(&items, 8, &tokens, " ");
        assert!(packed.len() > 1);
        for p in &packed {
            assert!(tokens.count(p) <= 8 + 4);
        }
    }

    #[test]
    fn test_fixed_window_single_short_text() {
        let tokens = TokenAccountant::new();
        let out = fixed_window("just a few words", 100, 10, &tokens);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0], "just a few words");
    }

    #[test]
    fn test_fixed_window_makes_progress_with_large_overlap() {
        let tokens = TokenAccountant::new();
        let text = "w ".repeat(200);
        // Overlap nearly equal to size must still terminate.
        let out = fixed_window(&text, 10, 9, &tokens);
        assert!(out.len() > 1);
        assert!(out.len() < 400);
    }
}
