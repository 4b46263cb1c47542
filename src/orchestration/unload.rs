//! # Unload Coordinator
//!
//! Tracks external "fully release unit X" requests that race against the
//! orchestrator's own detach/release cycle. Concurrent requests for the
//! same unit collapse into one record; every waiter is satisfied exactly
//! once from the single underlying release.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::lifecycle::executor::{run_phase, LifecycleExecutor};
use crate::lifecycle::timeouts::Phase;
use crate::registry::SharedUnit;
use crate::state_machine::{UnitEvent, UnitState};

pub(crate) type UnloadOutcome = std::result::Result<(), String>;

type UnloadSignal = watch::Sender<Option<UnloadOutcome>>;

/// Lookup of pending unload requests by unit name. Holds no unit state of
/// its own; the registry keeps owning the units.
pub(crate) struct UnloadCoordinator {
    requests: Mutex<HashMap<String, UnloadSignal>>,
}

impl UnloadCoordinator {
    pub(crate) fn new() -> Self {
        Self {
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Create a request for `name`, or join the existing one.
    pub(crate) fn request(&self, name: &str) -> watch::Receiver<Option<UnloadOutcome>> {
        let mut requests = self.requests.lock();
        if let Some(tx) = requests.get(name) {
            debug!(unit = name, "joining pending unload request");
            return tx.subscribe();
        }
        let (tx, rx) = watch::channel(None);
        requests.insert(name.to_string(), tx);
        debug!(unit = name, "unload requested");
        rx
    }

    pub(crate) fn is_requested(&self, name: &str) -> bool {
        self.requests.lock().contains_key(name)
    }

    /// Settle the request for `name`, waking every waiter. Idempotent: a
    /// request can only be removed once.
    pub(crate) fn finish(&self, name: &str, outcome: UnloadOutcome) {
        if let Some(tx) = self.requests.lock().remove(name) {
            let _ = tx.send(Some(outcome));
        }
    }

    /// Await a request's single resolution.
    pub(crate) async fn wait(mut rx: watch::Receiver<Option<UnloadOutcome>>) -> UnloadOutcome {
        loop {
            {
                let current = rx.borrow_and_update();
                if let Some(outcome) = current.clone() {
                    return outcome;
                }
            }
            if rx.changed().await.is_err() {
                return Err("unload request dropped before resolving".to_string());
            }
        }
    }
}

/// Release a unit if a request exists and the unit is in a releasable
/// state. No-op otherwise; the next pass (or the next detach completion)
/// will try again.
///
/// The user-supplied release phase is skipped for units that never got past
/// `LoadError`, and for quarantined units the request resolves without any
/// phase at all so unregistration of broken units can proceed.
pub(crate) async fn try_release(
    executor: &LifecycleExecutor,
    coordinator: &UnloadCoordinator,
    unit: &SharedUnit,
) {
    let (release, props, budget, name) = {
        let mut u = unit.lock().await;
        let name = u.name.clone();
        if !coordinator.is_requested(&name) {
            return;
        }
        match u.state {
            UnitState::NotLoaded | UnitState::SkipBecauseBroken => {
                u.lifecycles = None;
                coordinator.finish(&name, Ok(()));
                return;
            }
            // Another path is already releasing; its completion settles
            // every waiter.
            UnitState::Unloading => return,
            UnitState::NotBootstrapped | UnitState::NotMounted => {}
            UnitState::LoadError => {
                u.pending_load = None;
                u.load_error_at = None;
                executor.apply(&mut u, UnitEvent::ReleaseStarted);
                executor.apply(&mut u, UnitEvent::ReleaseSucceeded);
                coordinator.finish(&name, Ok(()));
                return;
            }
            // Mounted or mid-phase: cannot release until detached.
            _ => return,
        }
        let release = u.lifecycles.clone().map(|l| l.release);
        executor.apply(&mut u, UnitEvent::ReleaseStarted);
        (release, u.props(), u.timeouts.release, name)
    };

    let result = match release {
        Some(f) => run_phase(&name, Phase::Release, budget, f, props).await,
        None => Ok(()),
    };

    let mut u = unit.lock().await;
    // Released units carry no stale callables.
    u.lifecycles = None;
    u.pending_load = None;
    match result {
        Ok(()) => {
            u.load_error_at = None;
            executor.apply(&mut u, UnitEvent::ReleaseSucceeded);
            coordinator.finish(&name, Ok(()));
        }
        Err(message) => {
            executor.apply(&mut u, UnitEvent::ReleaseFailed(message.clone()));
            coordinator.finish(&name, Err(message));
        }
    }
}
