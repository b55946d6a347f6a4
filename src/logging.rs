//! # Structured Logging Module
//!
//! Environment-aware structured logging for debugging concurrent coordinator
//! populations. Console output is human-readable in development and JSON in
//! production environments.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// Safe to call more than once; only the first call installs a subscriber.
/// `BATCHER_ENV` selects the output format, `BATCHER_LOG` (falling back to
/// `RUST_LOG`) the filter.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);

        let json_output = environment == "production" || environment == "staging";

        let layer = if json_output {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(false)
                .json()
                .with_filter(EnvFilter::new(log_level))
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(EnvFilter::new(log_level))
                .boxed()
        };

        // try_init so an already-installed subscriber (e.g. from a test
        // harness) is not an error.
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        }

        tracing::info!(
            environment = %environment,
            "Structured logging initialized"
        );
    });
}

fn get_environment() -> String {
    std::env::var("BATCHER_ENV").unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> String {
    if let Ok(level) = std::env::var("BATCHER_LOG") {
        return level;
    }
    if let Ok(level) = std::env::var("RUST_LOG") {
        return level;
    }
    match environment {
        "production" | "staging" => "info".to_string(),
        "test" => "warn".to_string(),
        _ => "debug".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
    }
}
