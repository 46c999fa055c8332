//! Natural-language-to-SQL prompting and the offline fallback.
//!
//! The generated statement is *advisory*: execution goes through the
//! server's read-only gate regardless of what the model returns. The
//! fallback produces a best-effort SELECT over the most plausible table
//! when the LLM is unreachable; responses built from it are tagged so end
//! users can tell.

use std::sync::OnceLock;

use bankflow::Result;
use regex::Regex;

use crate::{GenerateOptions, OllamaClient};

/// System prompt pinning the model to SELECT-only SQLite.
pub const SYSTEM_PROMPT: &str = "You are a SQL expert. Given a natural language question and a database schema, generate a valid SQLite SELECT query.

Rules:
- Output ONLY the SQL query, no explanations
- Use only SELECT statements
- Never use INSERT, UPDATE, DELETE, DROP, ALTER, CREATE, or TRUNCATE
- Use proper SQLite syntax
- Use double quotes for table/column names if they contain special characters
- Limit results to 100 rows unless the user asks for a specific limit";

/// Outcome of SQL generation.
#[derive(Debug, Clone)]
pub struct GeneratedSql {
    pub sql: String,
    /// True when the heuristic fallback produced the statement.
    pub fallback: bool,
}

/// Convert a natural-language question to SQL, falling back to a heuristic
/// SELECT when the LLM is unreachable.
pub async fn generate_sql(
    client: &OllamaClient,
    natural_language: &str,
    schema: &str,
) -> Result<GeneratedSql> {
    let prompt = format!("Database Schema:\n{schema}\n\nQuestion: {natural_language}\n\nSQL Query:");

    match client
        .generate(&prompt, Some(SYSTEM_PROMPT), &GenerateOptions::default())
        .await
    {
        Ok(raw) => {
            let sql = extract_sql(&raw);
            if sql.is_empty() {
                Ok(GeneratedSql {
                    sql: fallback_sql(natural_language, schema),
                    fallback: true,
                })
            } else {
                Ok(GeneratedSql { sql, fallback: false })
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "LLM unreachable for text2sql; using heuristic fallback");
            Ok(GeneratedSql {
                sql: fallback_sql(natural_language, schema),
                fallback: true,
            })
        }
    }
}

fn code_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)```(?:sql)?\s*(SELECT.+?)```").unwrap_or_else(|_| unreachable!())
    })
}

/// Extract SQL from model output, tolerating markdown code fences and
/// surrounding prose. Returns an empty string when no SELECT is found.
pub fn extract_sql(text: &str) -> String {
    if let Some(caps) = code_block_re().captures(text) {
        return caps[1].trim().trim_end_matches(';').to_string() + ";";
    }

    let mut sql_lines = Vec::new();
    let mut collecting = false;
    for line in text.lines() {
        let stripped = line.trim();
        if collecting || stripped.to_ascii_uppercase().starts_with("SELECT") {
            collecting = true;
            sql_lines.push(line);
            if stripped.ends_with(';') {
                break;
            }
        }
    }

    if sql_lines.is_empty() {
        return String::new();
    }
    sql_lines.join("\n").trim().trim_end_matches(';').to_string() + ";"
}

fn table_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"TABLE\s+(\w+)").unwrap_or_else(|_| unreachable!()))
}

/// Heuristic SELECT over the most plausible table in the schema.
pub fn fallback_sql(natural_language: &str, schema: &str) -> String {
    let nl_lower = natural_language.to_lowercase();
    let tables: Vec<&str> = table_re()
        .captures_iter(schema)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();

    if tables.is_empty() {
        return "SELECT 1 AS no_tables_found;".to_string();
    }

    let target = tables
        .iter()
        .find(|t| nl_lower.contains(&t.to_lowercase()))
        .unwrap_or(&tables[0]);

    if nl_lower.contains("count") || nl_lower.contains("how many") {
        return format!("SELECT COUNT(*) AS total FROM \"{target}\";");
    }

    format!("SELECT * FROM \"{target}\" LIMIT 100;")
}
