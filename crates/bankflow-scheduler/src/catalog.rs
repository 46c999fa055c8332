//! Static use-case registry.
//!
//! Use cases are registered at program start and never destroyed. The key
//! enters filesystem paths and collection names, so it is validated on
//! construction.

use bankflow::core::sanitize::validate_use_case_key;
use bankflow::{Error, Result};
use serde::Serialize;

/// A named unit of work.
#[derive(Debug, Clone, Serialize)]
pub struct UseCase {
    pub key: String,
    pub label: String,
    pub category: String,
    pub domain: String,
    pub target_column: Option<String>,
    pub numeric_hints: Vec<String>,
}

impl UseCase {
    pub fn new(
        key: &str,
        label: &str,
        category: &str,
        domain: &str,
        target_column: Option<&str>,
    ) -> Result<Self> {
        if !validate_use_case_key(key) {
            return Err(Error::validation(format!("Invalid use case key: '{key}'")));
        }
        Ok(Self {
            key: key.to_string(),
            label: label.to_string(),
            category: category.to_string(),
            domain: domain.to_string(),
            target_column: target_column.map(str::to_string),
            numeric_hints: Vec::new(),
        })
    }
}

/// The built-in banking portfolio.
pub fn default_catalog() -> Vec<UseCase> {
    [
        ("uc_fr_01_fraud_management", "Fraud Management", "Risk & Financial Crime", "fraud", Some("is_fraud")),
        ("uc_cr_02_credit_risk", "Credit Risk & Lending", "Risk & Financial Crime", "credit", Some("default")),
        ("uc_aml_03_financial_crime", "AML / Financial Crime", "Risk & Financial Crime", "aml", Some("is_suspicious")),
        ("uc_cc_05_contact_center", "Contact Center", "Operations", "general", Some("escalated")),
        ("uc_hr_12_workforce", "Workforce & HR", "Operations", "general", Some("attrition")),
        ("uc_gov_13_data_ai_governance", "Data & AI Governance", "Governance & Platform", "governance", None),
        ("uc_tf_08_treasury", "Treasury & Finance", "Enterprise Decisioning", "general", Some("breach")),
        ("uc_st_14_strategy", "Strategy & Transformation", "Enterprise Decisioning", "general", None),
    ]
    .iter()
    .filter_map(|(key, label, category, domain, target)| {
        UseCase::new(key, label, category, domain, *target).ok()
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog() {
        let catalog = default_catalog();
        assert_eq!(catalog.len(), 8);
        assert!(catalog.iter().all(|uc| validate_use_case_key(&uc.key)));
        let fraud = catalog.iter().find(|uc| uc.domain == "fraud").unwrap();
        assert_eq!(fraud.target_column.as_deref(), Some("is_fraud"));
    }

    #[test]
    fn test_invalid_key_rejected() {
        assert!(UseCase::new("../bad", "Bad", "c", "d", None).is_err());
    }
}
