//! Pre-retrieval analysis: intent classification, entity extraction,
//! metadata filters, and the intent-aware query rewrite.

use std::sync::OnceLock;

use bankflow_vectorstores::Filters;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

/// Keyword-classified query intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Factual,
    Analytical,
    Comparative,
    Procedural,
    General,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Factual => "factual",
            Self::Analytical => "analytical",
            Self::Comparative => "comparative",
            Self::Procedural => "procedural",
            Self::General => "general",
        }
    }
}

/// Extracted entities and domain tags.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Entities {
    pub account_numbers: Vec<String>,
    pub amounts: Vec<String>,
    pub dates: Vec<String>,
    pub domains: Vec<String>,
}

/// Full pre-retrieval result.
#[derive(Debug, Clone, Serialize)]
pub struct QueryAnalysis {
    pub intent: Intent,
    pub entities: Entities,
    #[serde(skip)]
    pub filters: Option<Filters>,
    pub rewritten: String,
}

const DOMAIN_KEYWORDS: &[(&str, &[&str])] = &[
    ("fraud", &["fraud", "fraudulent", "scam", "chargeback"]),
    ("credit", &["credit", "loan", "lending", "underwriting", "default"]),
    ("aml", &["aml", "laundering", "sanctions", "kyc", "suspicious activity"]),
    ("collections", &["collection", "collections", "recovery", "delinquent", "arrears"]),
    ("governance", &["governance", "compliance", "policy", "audit", "lineage"]),
];

fn account_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{8,16}\b").unwrap_or_else(|_| unreachable!()))
}

fn amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\s?\d+(?:,\d{3})*(?:\.\d+)?|\b\d+(?:\.\d+)?\s?(?:USD|EUR|GBP|CHF)\b")
            .unwrap_or_else(|_| unreachable!())
    })
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b\d{4}-\d{2}-\d{2}\b|\b\d{1,2}/\d{1,2}/\d{2,4}\b")
            .unwrap_or_else(|_| unreachable!())
    })
}

/// Stateless pre-retrieval analyzer.
#[derive(Debug, Default, Clone)]
pub struct PreRetrieval;

impl PreRetrieval {
    pub fn new() -> Self {
        Self
    }

    /// Run the full analysis: intent, entities, filters, rewrite.
    pub fn analyze(&self, query: &str) -> QueryAnalysis {
        let intent = self.classify_intent(query);
        let entities = self.extract_entities(query);
        let filters = self.build_filters(&entities);
        let rewritten = self.rewrite_query(query, intent);
        QueryAnalysis {
            intent,
            entities,
            filters,
            rewritten,
        }
    }

    /// Keyword intent classification. Order matters: comparative and
    /// procedural phrasings often also contain "what"/"how".
    pub fn classify_intent(&self, query: &str) -> Intent {
        let q = query.to_lowercase();
        if ["compare", "versus", " vs ", "difference between"].iter().any(|k| q.contains(k)) {
            return Intent::Comparative;
        }
        if ["steps", "procedure", "process for", "how to", "how do i"].iter().any(|k| q.contains(k)) {
            return Intent::Procedural;
        }
        if ["how", "why", "explain", "analyze", "analyse"].iter().any(|k| q.contains(k)) {
            return Intent::Analytical;
        }
        if ["what is", "what are", "define", "describe", "who", "when", "where"]
            .iter()
            .any(|k| q.contains(k))
        {
            return Intent::Factual;
        }
        Intent::General
    }

    /// Regex entity extraction plus keyword domain tagging.
    pub fn extract_entities(&self, query: &str) -> Entities {
        let q = query.to_lowercase();
        let domains = DOMAIN_KEYWORDS
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|k| q.contains(k)))
            .map(|(domain, _)| (*domain).to_string())
            .collect();

        Entities {
            account_numbers: account_re()
                .find_iter(query)
                .map(|m| m.as_str().to_string())
                .collect(),
            amounts: amount_re()
                .find_iter(query)
                .map(|m| m.as_str().to_string())
                .collect(),
            dates: date_re()
                .find_iter(query)
                .map(|m| m.as_str().to_string())
                .collect(),
            domains,
        }
    }

    /// Metadata filters from domain entities; a single domain tag becomes
    /// an equality filter, multiple tags are left unfiltered (equality
    /// cannot express a disjunction).
    pub fn build_filters(&self, entities: &Entities) -> Option<Filters> {
        if entities.domains.len() != 1 {
            return None;
        }
        let mut filters = Filters::new();
        filters.insert(
            "domain".to_string(),
            Value::String(entities.domains[0].clone()),
        );
        Some(filters)
    }

    /// Intent-appropriate rewrite prefix.
    pub fn rewrite_query(&self, query: &str, intent: Intent) -> String {
        let prefix = match intent {
            Intent::Factual => "Define and explain: ",
            Intent::Analytical => "Analyze in detail: ",
            Intent::Comparative => "Compare and contrast: ",
            Intent::Procedural => "List the steps for: ",
            Intent::General => "",
        };
        format!("{prefix}{query}")
    }
}
