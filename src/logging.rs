//! # Structured Logging Module
//!
//! Environment-aware tracing initialization for debugging lifecycle
//! reconciliation across async phase boundaries.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// Respects `RUST_LOG` when set; otherwise defaults by `COMPOSER_ENV`
/// (debug everywhere except production). Safe to call more than once.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_log_level(&get_environment())));

        // A host may have installed its own subscriber already; that is fine.
        if tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .is_err()
        {
            tracing::debug!("global tracing subscriber already initialized, continuing");
        }
    });
}

fn get_environment() -> String {
    std::env::var("COMPOSER_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn default_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}
