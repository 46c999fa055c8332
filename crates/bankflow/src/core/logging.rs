//! Structured JSON logging.
//!
//! All logs are JSON lines: RFC 3339 UTC timestamp, level, target, message,
//! file/line, plus the fields of the current span. The HTTP layer opens a
//! `request` span carrying `correlation_id`, so every log line emitted while
//! handling a request is correlatable. Third-party chatter is capped at WARN.

use tracing_subscriber::EnvFilter;

/// Default directives keeping noisy dependencies quiet.
const THIRD_PARTY_DIRECTIVES: &[&str] = &[
    "hyper=warn",
    "reqwest=warn",
    "tower_http=warn",
    "h2=warn",
    "rustls=warn",
];

/// Install the global JSON subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Safe to call more
/// than once; later calls are no-ops.
pub fn init(level: &str) {
    let default_filter = std::iter::once(level.to_ascii_lowercase())
        .chain(THIRD_PARTY_DIRECTIVES.iter().map(|d| (*d).to_string()))
        .collect::<Vec<_>>()
        .join(",");

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_reentrant() {
        init("info");
        init("debug");
    }
}
