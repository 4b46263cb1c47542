//! Unit data model: one registered micro-app and its persistent metadata.

use std::sync::Arc;

use serde_json::Value;
use tokio::time::Instant;
use tracing::warn;

use crate::error::{ComposerError, Result};
use crate::lifecycle::executor::PendingLoad;
use crate::lifecycle::exports::{UnitLifecycles, UnitProps};
use crate::lifecycle::loader::UnitLoader;
use crate::lifecycle::timeouts::PhaseTimeouts;
use crate::routing::{ActivityFn, RoutingContext};
use crate::state_machine::UnitState;

/// What a host supplies to register a unit.
pub struct UnitRegistration {
    pub(crate) name: String,
    pub(crate) loader: Arc<dyn UnitLoader>,
    pub(crate) activity: ActivityFn,
    pub(crate) custom_props: Value,
    pub(crate) timeouts: Option<PhaseTimeouts>,
}

impl UnitRegistration {
    pub fn new(name: impl Into<String>, loader: Arc<dyn UnitLoader>, activity: ActivityFn) -> Self {
        Self {
            name: name.into(),
            loader,
            activity,
            custom_props: Value::Object(serde_json::Map::new()),
            timeouts: None,
        }
    }

    /// Opaque properties passed to every lifecycle call. Caller-owned; the
    /// core clones them per call and never mutates them.
    pub fn with_props(mut self, props: Value) -> Self {
        self.custom_props = props;
        self
    }

    /// Override the default per-phase budgets for this unit.
    pub fn with_timeouts(mut self, timeouts: PhaseTimeouts) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ComposerError::InvalidRegistration {
                reason: "unit name must be a non-empty string".to_string(),
            });
        }
        Ok(())
    }
}

/// One registered unit. Owned by the registry behind a per-unit mutex; all
/// state writes happen between suspension points with the lock held.
pub struct Unit {
    pub(crate) name: String,
    pub(crate) state: UnitState,
    pub(crate) activity: ActivityFn,
    pub(crate) loader: Arc<dyn UnitLoader>,
    pub(crate) custom_props: Value,
    pub(crate) lifecycles: Option<UnitLifecycles>,
    pub(crate) pending_load: Option<PendingLoad>,
    pub(crate) load_error_at: Option<Instant>,
    pub(crate) timeouts: PhaseTimeouts,
    pub(crate) failure: Option<String>,
}

impl std::fmt::Debug for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unit")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

impl Unit {
    pub(crate) fn new(registration: UnitRegistration, default_timeouts: PhaseTimeouts) -> Self {
        Self {
            name: registration.name,
            state: UnitState::default(),
            activity: registration.activity,
            loader: registration.loader,
            custom_props: registration.custom_props,
            lifecycles: None,
            pending_load: None,
            load_error_at: None,
            timeouts: registration.timeouts.unwrap_or(default_timeouts),
            failure: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub(crate) fn props(&self) -> UnitProps {
        UnitProps {
            name: self.name.clone(),
            custom: self.custom_props.clone(),
        }
    }

    /// Evaluate the activity predicate. Quarantined units are never active;
    /// a predicate failure counts as inactive for this evaluation only.
    pub(crate) fn should_be_active(&self, ctx: &RoutingContext) -> bool {
        if self.state.is_broken() {
            return false;
        }
        match (self.activity)(ctx) {
            Ok(active) => active,
            Err(err) => {
                warn!(
                    unit = %self.name,
                    error = %err,
                    "activity predicate failed, treating unit as inactive"
                );
                false
            }
        }
    }
}
