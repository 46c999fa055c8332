//! Response quality evaluation.
//!
//! Five scores in [0, 1]: relevance (query-word overlap, length-bounded),
//! groundedness (fraction of response sentences whose content words are
//! covered by the retrieved corpus), completeness, hallucination
//! (1 − groundedness), and coherence (sentence regularity + casing and
//! terminal punctuation).

use std::collections::HashSet;

use bankflow_splitters::split_sentences;
use serde::Serialize;

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "of", "to", "in", "on", "for", "with", "at", "by",
    "from", "is", "are", "was", "were", "be", "been", "being", "it", "its", "this", "that",
    "these", "those", "as", "if", "than", "then", "so", "such", "not", "no", "can", "could",
    "will", "would", "should", "may", "might", "do", "does", "did", "have", "has", "had",
];

/// The five quality scores.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EvalScores {
    pub relevance: f64,
    pub groundedness: f64,
    pub completeness: f64,
    pub hallucination: f64,
    pub coherence: f64,
}

fn content_words(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1 && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Evaluate a generated response against the query and the assembled
/// retrieval corpus.
pub fn evaluate_response(query: &str, response: &str, corpus: &str) -> EvalScores {
    let groundedness = groundedness_score(response, corpus);
    EvalScores {
        relevance: relevance_score(query, response),
        groundedness,
        completeness: completeness_score(query, response),
        hallucination: 1.0 - groundedness,
        coherence: coherence_score(response),
    }
}

/// Query-word coverage with a length sanity bound.
fn relevance_score(query: &str, response: &str) -> f64 {
    let query_words = content_words(query);
    if query_words.is_empty() {
        return 0.5;
    }
    let response_words = content_words(response);
    let overlap = query_words.intersection(&response_words).count() as f64;
    let coverage = overlap / query_words.len() as f64;

    // Extremely short responses cannot be very relevant.
    let length_factor = (response.split_whitespace().count() as f64 / 20.0).min(1.0);
    (coverage * 0.8 + length_factor * 0.2).clamp(0.0, 1.0)
}

/// Fraction of response sentences whose content words appear at least 50%
/// in the corpus.
fn groundedness_score(response: &str, corpus: &str) -> f64 {
    let corpus_words = content_words(corpus);
    if corpus_words.is_empty() {
        return 0.0;
    }
    let sentences = split_sentences(response);
    if sentences.is_empty() {
        return 0.0;
    }

    let grounded = sentences
        .iter()
        .filter(|sentence| {
            let words = content_words(sentence);
            if words.is_empty() {
                return true;
            }
            let covered = words.iter().filter(|w| corpus_words.contains(*w)).count();
            covered as f64 / words.len() as f64 >= 0.5
        })
        .count();
    grounded as f64 / sentences.len() as f64
}

/// Length threshold + query-word coverage.
fn completeness_score(query: &str, response: &str) -> f64 {
    let word_count = response.split_whitespace().count();
    let length_score = (word_count as f64 / 50.0).min(1.0);

    let query_words = content_words(query);
    let coverage = if query_words.is_empty() {
        0.5
    } else {
        let response_words = content_words(response);
        query_words.intersection(&response_words).count() as f64 / query_words.len() as f64
    };

    (length_score * 0.5 + coverage * 0.5).clamp(0.0, 1.0)
}

/// Sentence-length regularity plus capitalization / terminal punctuation.
fn coherence_score(response: &str) -> f64 {
    let sentences = split_sentences(response);
    if sentences.is_empty() {
        return 0.0;
    }

    let lengths: Vec<f64> = sentences
        .iter()
        .map(|s| s.split_whitespace().count() as f64)
        .collect();
    let mean = lengths.iter().sum::<f64>() / lengths.len() as f64;
    let variance = lengths.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / lengths.len() as f64;
    // Coefficient-of-variation based regularity.
    let regularity = if mean > 0.0 {
        (1.0 - (variance.sqrt() / mean).min(1.0)).max(0.0)
    } else {
        0.0
    };

    let well_formed = sentences
        .iter()
        .filter(|s| {
            let starts_upper = s.chars().next().is_some_and(|c| c.is_uppercase() || c.is_numeric());
            let ends_terminal = s.trim_end().ends_with(['.', '!', '?']);
            starts_upper && ends_terminal
        })
        .count() as f64
        / sentences.len() as f64;

    (regularity * 0.4 + well_formed * 0.6).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORPUS: &str = "Fraud detection uses transaction monitoring rules. \
Suspicious wire transfers above thresholds are escalated to analysts. \
Chargeback rates feed the monthly fraud report.";

    #[test]
    fn test_grounded_response_scores_high() {
        let response = "Fraud detection relies on transaction monitoring rules. \
Suspicious wire transfers are escalated to analysts.";
        let scores = evaluate_response("How does fraud detection work?", response, CORPUS);
        assert!(scores.groundedness > 0.9, "groundedness {}", scores.groundedness);
        assert!(scores.hallucination < 0.1);
        assert!(scores.relevance > 0.3);
        assert!((0.0..=1.0).contains(&scores.coherence));
    }

    #[test]
    fn test_fabricated_response_scores_low() {
        let response = "Quantum blockchain oracles eliminate risk entirely. \
Nobody reviews anything manually anymore.";
        let scores = evaluate_response("How does fraud detection work?", response, CORPUS);
        assert!(scores.groundedness < 0.5);
        assert!(scores.hallucination > 0.5);
    }

    #[test]
    fn test_empty_corpus_means_ungrounded() {
        let scores = evaluate_response("query", "Some answer here.", "");
        assert_eq!(scores.groundedness, 0.0);
        assert_eq!(scores.hallucination, 1.0);
    }

    #[test]
    fn test_scores_bounded() {
        let scores = evaluate_response(
            "compare fraud and aml monitoring",
            "Fraud monitoring differs from AML monitoring in scope and cadence. \
Fraud rules fire in real time. AML reviews run in batches.",
            CORPUS,
        );
        for v in [
            scores.relevance,
            scores.groundedness,
            scores.completeness,
            scores.hallucination,
            scores.coherence,
        ] {
            assert!((0.0..=1.0).contains(&v), "{v}");
        }
    }

    #[test]
    fn test_coherence_prefers_well_formed() {
        let tidy = coherence_score("This is a sentence. Here is another one. And a third.");
        let messy = coherence_score("ok. whatever no caps here and it just keeps going on and on with nothing");
        assert!(tidy > messy);
    }

    #[test]
    fn test_empty_response() {
        let scores = evaluate_response("query", "", CORPUS);
        assert_eq!(scores.groundedness, 0.0);
        assert_eq!(scores.coherence, 0.0);
    }
}
