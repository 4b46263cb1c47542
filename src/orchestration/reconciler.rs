//! # Reconciler
//!
//! Pure classification: given a snapshot of every unit, the routing-derived
//! activity bit, and the unload-request set, sort each unit into at most one
//! of four buckets. No side effects; the orchestrator owns execution.

use std::time::Duration;

use crate::state_machine::UnitState;

/// Point-in-time view of one unit, read under its lock at the start of a
/// pass.
#[derive(Debug, Clone)]
pub(crate) struct UnitSnapshot {
    pub name: String,
    pub state: UnitState,
    /// Quarantine-aware activity: broken units are never active.
    pub active_now: bool,
    pub unload_requested: bool,
    /// Time since the last transient load failure, if any.
    pub load_error_age: Option<Duration>,
}

/// The four disjoint work lists for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ReconciliationPlan {
    pub to_load: Vec<String>,
    pub to_attach: Vec<String>,
    pub to_detach: Vec<String>,
    pub to_release: Vec<String>,
}

impl ReconciliationPlan {
    pub fn is_empty(&self) -> bool {
        self.to_load.is_empty()
            && self.to_attach.is_empty()
            && self.to_detach.is_empty()
            && self.to_release.is_empty()
    }
}

/// Classify every unit. Transitional states are skipped (their chain is in
/// flight and will retrigger on completion); `LoadError` units inside the
/// quarantine window are skipped so a failing load is not hammered.
pub(crate) fn plan(snapshots: &[UnitSnapshot], quarantine: Duration) -> ReconciliationPlan {
    let mut plan = ReconciliationPlan::default();

    for s in snapshots {
        match s.state {
            UnitState::LoadError => {
                if s.active_now && s.load_error_age.is_some_and(|age| age >= quarantine) {
                    plan.to_load.push(s.name.clone());
                }
            }
            UnitState::NotLoaded | UnitState::LoadingSourceCode => {
                if s.active_now {
                    plan.to_load.push(s.name.clone());
                }
            }
            UnitState::NotBootstrapped | UnitState::NotMounted => {
                if !s.active_now && s.unload_requested {
                    plan.to_release.push(s.name.clone());
                } else if s.active_now {
                    plan.to_attach.push(s.name.clone());
                }
            }
            UnitState::Mounted => {
                if !s.active_now {
                    plan.to_detach.push(s.name.clone());
                }
            }
            // In-flight or quarantined: nothing to schedule.
            UnitState::Bootstrapping
            | UnitState::Mounting
            | UnitState::Unmounting
            | UnitState::Unloading
            | UnitState::SkipBecauseBroken => {}
        }
    }

    plan
}
