use crate::error::{ComposerError, Result};
use crate::lifecycle::timeouts::PhaseTimeouts;
use serde::{Deserialize, Serialize};

/// Tunable knobs for the composition core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposerConfig {
    /// Minimum delay before retrying a load after a transient failure.
    pub load_retry_quarantine_ms: u64,
    /// Capacity of the lifecycle event broadcast channel.
    pub event_channel_capacity: usize,
    /// Default per-phase budgets, overridable per unit at registration.
    pub timeouts: PhaseTimeouts,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            load_retry_quarantine_ms: 200,
            event_channel_capacity: 1_000,
            timeouts: PhaseTimeouts::default(),
        }
    }
}

impl ComposerConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(quarantine) = std::env::var("COMPOSER_LOAD_RETRY_QUARANTINE_MS") {
            config.load_retry_quarantine_ms = quarantine.parse().map_err(|e| {
                ComposerError::Configuration(format!("Invalid load_retry_quarantine_ms: {e}"))
            })?;
        }

        if let Ok(capacity) = std::env::var("COMPOSER_EVENT_CHANNEL_CAPACITY") {
            config.event_channel_capacity = capacity.parse().map_err(|e| {
                ComposerError::Configuration(format!("Invalid event_channel_capacity: {e}"))
            })?;
        }

        Ok(config)
    }
}
