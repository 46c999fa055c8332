//! Identifier validation and small shared formatting helpers.

use std::sync::OnceLock;

use regex::Regex;

use crate::core::error::{Error, Result};

fn uc_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Keys enter filesystem paths and SQL identifiers; keep the alphabet tight.
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_\-]{1,120}$").unwrap_or_else(|_| unreachable!()))
}

/// Whether a use-case key is safe for file paths and collection names.
pub fn validate_use_case_key(key: &str) -> bool {
    uc_key_re().is_match(key)
}

/// Strip every character outside `[A-Za-z0-9_]` from a SQL identifier.
///
/// # Errors
///
/// Returns `Validation` when nothing survives the strip.
pub fn sanitize_table_name(name: &str) -> Result<String> {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if cleaned.is_empty() {
        return Err(Error::validation(format!(
            "Table name '{name}' contains no valid identifier characters"
        )));
    }
    Ok(cleaned)
}

/// Bytes to a human-readable size string.
pub fn human_size(nbytes: u64) -> String {
    let mut value = nbytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if value < 1024.0 {
            return format!("{value:.1} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.1} PB")
}
