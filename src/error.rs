//! # Core Error Types
//!
//! Structured error handling for the composition core using thiserror
//! for typed errors instead of `Box<dyn Error>` patterns.

use thiserror::Error;

/// Errors surfaced by the host-facing API.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComposerError {
    #[error("a unit named '{name}' is already registered")]
    DuplicateName { name: String },

    #[error("no unit named '{name}' is registered")]
    UnitNotFound { name: String },

    #[error("invalid registration: {reason}")]
    InvalidRegistration { reason: String },

    #[error("unload of unit '{name}' failed: {reason}")]
    UnloadFailed { name: String, reason: String },

    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, ComposerError>;
