//! Environment-driven settings.
//!
//! All configuration is read once at startup from `BANKING_`-prefixed
//! environment variables, with every filesystem path derived from a single
//! `base_dir`. Components receive `Arc<Settings>` by explicit parameter;
//! there is no global lookup.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::core::error::{Error, Result};

const ENV_PREFIX: &str = "BANKING_";

/// Process-wide settings, resolved once at startup.
///
/// Resolution fails fast on invalid values (non-numeric sizes, zero worker
/// count, negative rate limit) rather than deferring surprises to runtime.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root of all derived paths.
    pub base_dir: PathBuf,

    /// LLM endpoint base URL.
    pub ollama_base_url: String,
    /// Default LLM model identifier.
    pub ollama_model: String,

    /// External vector collection service endpoint (qdrant backend only).
    pub qdrant_url: String,

    /// Rows loaded per preprocessing pass.
    pub sample_limit: usize,
    /// Scheduler worker pool size.
    pub max_workers: usize,
    /// Per-subtask wall-clock budget in seconds.
    pub subtask_timeout_secs: u64,

    /// Maximum upload size in bytes.
    pub max_upload_size: usize,
    /// Allowed upload file extensions (lowercase, with leading dot).
    pub allowed_extensions: BTreeSet<String>,

    /// Admin API requests per minute per client IP.
    pub rate_limit: u32,

    /// CORS origin allowlist.
    pub cors_origins: Vec<String>,

    /// Log level name (TRACE/DEBUG/INFO/WARN/ERROR).
    pub log_level: String,

    /// Optional API key; when set, admin routes require it.
    pub api_key: Option<String>,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env_var(name) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            Error::validation(format!("Invalid value for {ENV_PREFIX}{name}: '{raw}'"))
        }),
        None => Ok(default),
    }
}

/// Path setting with an env override, otherwise derived from `base_dir`.
fn env_path(name: &str, base: &Path, default_rel: &str) -> PathBuf {
    env_var(name).map_or_else(|| base.join(default_rel), PathBuf::from)
}

impl Settings {
    /// Build settings from the environment.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when a variable holds an unparseable or
    /// out-of-range value.
    pub fn from_env() -> Result<Self> {
        let base_dir = env_var("BASE_DIR").map_or_else(
            || std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            PathBuf::from,
        );

        let max_workers: usize = env_parse("MAX_WORKERS", 8)?;
        if max_workers == 0 {
            return Err(Error::validation("BANKING_MAX_WORKERS must be at least 1"));
        }

        let rate_limit: i64 = env_parse("RATE_LIMIT", 100)?;
        if rate_limit <= 0 {
            return Err(Error::validation("BANKING_RATE_LIMIT must be positive"));
        }

        let log_level = env_var("LOG_LEVEL").unwrap_or_else(|| "INFO".to_string());
        let normalized = log_level.to_ascii_uppercase();
        if !matches!(normalized.as_str(), "TRACE" | "DEBUG" | "INFO" | "WARN" | "ERROR") {
            return Err(Error::validation(format!(
                "Unknown BANKING_LOG_LEVEL: '{log_level}'"
            )));
        }

        let cors_origins = env_var("CORS_ORIGINS").map_or_else(
            || {
                vec![
                    "http://localhost:5173".to_string(),
                    "http://localhost:3000".to_string(),
                    "http://127.0.0.1:5173".to_string(),
                    "http://127.0.0.1:3000".to_string(),
                ]
            },
            |raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            },
        );

        let allowed_extensions = [".csv", ".json", ".xlsx", ".xls"]
            .iter()
            .map(|s| (*s).to_string())
            .collect();

        Ok(Self {
            base_dir,
            ollama_base_url: env_var("OLLAMA_BASE_URL")
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            ollama_model: env_var("OLLAMA_MODEL").unwrap_or_else(|| "llama3.2".to_string()),
            qdrant_url: env_var("QDRANT_URL")
                .unwrap_or_else(|| "http://localhost:6334".to_string()),
            sample_limit: env_parse("SAMPLE_LIMIT", 500_000)?,
            max_workers,
            subtask_timeout_secs: env_parse("SUBTASK_TIMEOUT_SECS", 1800)?,
            max_upload_size: env_parse("MAX_UPLOAD_SIZE", 500 * 1024 * 1024)?,
            allowed_extensions,
            rate_limit: rate_limit as u32,
            cors_origins,
            log_level: normalized,
            api_key: env_var("API_KEY"),
        })
    }

    /// Settings rooted at an explicit directory, with library defaults for
    /// everything else. Used by tests and embedded callers.
    pub fn for_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ollama_base_url: "http://localhost:11434".to_string(),
            ollama_model: "llama3.2".to_string(),
            qdrant_url: "http://localhost:6334".to_string(),
            sample_limit: 500_000,
            max_workers: 8,
            subtask_timeout_secs: 1800,
            max_upload_size: 500 * 1024 * 1024,
            allowed_extensions: [".csv", ".json", ".xlsx", ".xls"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            rate_limit: 100,
            cors_origins: vec!["http://localhost:5173".to_string()],
            log_level: "INFO".to_string(),
            api_key: None,
        }
    }

    // Derived paths. Directory-valued paths are created lazily by the
    // components that own them.

    /// Admin database (datasets, jobs, alerts, audit, integrations, text2sql).
    pub fn admin_db(&self) -> PathBuf {
        env_path("ADMIN_DB", &self.base_dir, "admin.db")
    }

    /// Pipeline results database (job_status, subtask_runs, governance_scores).
    pub fn results_db(&self) -> PathBuf {
        env_path("RESULTS_DB", &self.base_dir, "ml_pipeline_results.db")
    }

    /// Preprocessing results database.
    pub fn preprocessing_db(&self) -> PathBuf {
        env_path("PREPROCESSING_DB", &self.base_dir, "preprocessing_results.db")
    }

    /// Query/embedding cache database.
    pub fn rag_cache_db(&self) -> PathBuf {
        env_path("RAG_CACHE_DB", &self.base_dir, "rag_cache.db")
    }

    /// Read-mostly unified source database.
    pub fn unified_db(&self) -> PathBuf {
        env_path("UNIFIED_DB", &self.base_dir, "banking_unified.db")
    }

    /// Component log files.
    pub fn logs_dir(&self) -> PathBuf {
        env_path("LOGS_DIR", &self.base_dir, "logs")
    }

    /// Per-use-case preprocessing artifacts.
    pub fn output_dir(&self) -> PathBuf {
        env_path("OUTPUT_DIR", &self.base_dir, "preprocessing_output")
    }

    /// Vector index snapshots.
    pub fn vector_store_dir(&self) -> PathBuf {
        env_path("VECTOR_STORE_DIR", &self.base_dir, "vector_store")
    }

    /// Uploaded dataset files.
    pub fn uploads_dir(&self) -> PathBuf {
        self.base_dir.join("uploads")
    }

    /// Persisted model artifacts.
    pub fn models_dir(&self) -> PathBuf {
        self.base_dir.join("models")
    }

    /// Use-case source data root.
    pub fn use_cases_dir(&self) -> PathBuf {
        env_path("USE_CASES_DIR", &self.base_dir, "use_cases")
    }

    /// At-rest encryption key file.
    pub fn encryption_key_file(&self) -> PathBuf {
        self.base_dir.join(".encryption.key")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_base_dir_defaults() {
        let s = Settings::for_base_dir("/tmp/bf");
        assert_eq!(s.admin_db(), PathBuf::from("/tmp/bf/admin.db"));
        assert_eq!(s.rate_limit, 100);
        assert_eq!(s.max_workers, 8);
        assert!(s.allowed_extensions.contains(".csv"));
        assert!(s.api_key.is_none());
    }

    #[test]
    fn test_derived_paths_share_base() {
        let s = Settings::for_base_dir("/data/platform");
        for p in [
            s.results_db(),
            s.preprocessing_db(),
            s.rag_cache_db(),
            s.unified_db(),
            s.uploads_dir(),
            s.models_dir(),
            s.encryption_key_file(),
        ] {
            assert!(p.starts_with("/data/platform"), "{p:?}");
        }
    }
}
