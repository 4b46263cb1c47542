//! # Lifecycle Executor
//!
//! Drives a unit's transition functions under the Timeout Policy and funnels
//! every resulting state change through the transition table. Failures are
//! converted into state transitions plus a published event here; nothing
//! propagates into the orchestrator's control flow.

use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::exports::{LifecycleFn, UnitProps};
use super::loader::{LoadUnitError, UnitLoader};
use super::timeouts::{reasonable_time, Phase, PhaseTimeout};
use crate::events::EventPublisher;
use crate::registry::{SharedUnit, Unit};
use crate::state_machine::{transition, LoadFailureKind, UnitEvent, UnitState};

pub(crate) type LoadOutcome = std::result::Result<(), LoadUnitError>;

/// In-flight load handle stored on the unit so a concurrent load request
/// awaits the same operation instead of starting a duplicate.
pub(crate) type PendingLoad = Shared<BoxFuture<'static, LoadOutcome>>;

#[derive(Clone)]
pub(crate) struct LifecycleExecutor {
    publisher: EventPublisher,
}

impl LifecycleExecutor {
    pub(crate) fn new(publisher: EventPublisher) -> Self {
        Self { publisher }
    }

    /// Apply a state machine event to a unit and publish the transition.
    ///
    /// Callers gate on the current state before raising events, so a
    /// rejected edge is an internal inconsistency: it is logged and the
    /// unit's state is left untouched.
    pub(crate) fn apply(&self, unit: &mut Unit, event: UnitEvent) {
        match transition(unit.state, &event) {
            Ok(next) => {
                let from = unit.state;
                unit.state = next;
                let error = event.error_message().map(str::to_string);
                if let Some(message) = &error {
                    unit.failure = Some(message.clone());
                }
                if next.is_broken() {
                    warn!(
                        unit = %unit.name,
                        from = %from,
                        error = error.as_deref().unwrap_or_default(),
                        "unit quarantined"
                    );
                } else {
                    debug!(
                        unit = %unit.name,
                        from = %from,
                        to = %next,
                        event = event.event_type(),
                        "unit transitioned"
                    );
                }
                self.publisher.publish(&unit.name, from, next, error);
            }
            Err(err) => {
                error!(
                    unit = %unit.name,
                    event = event.event_type(),
                    %err,
                    "illegal transition suppressed"
                );
            }
        }
    }

    /// Load a unit's source. Idempotent: a load already in flight is awaited
    /// rather than duplicated, and any state other than `NotLoaded` /
    /// `LoadError` returns immediately without side effects.
    pub(crate) async fn load(&self, unit: &SharedUnit) {
        let pending = {
            let mut u = unit.lock().await;
            match &u.pending_load {
                Some(pending) => pending.clone(),
                None => {
                    if !matches!(u.state, UnitState::NotLoaded | UnitState::LoadError) {
                        return;
                    }
                    self.apply(&mut u, UnitEvent::LoadStarted);
                    let fut = perform_load(
                        Arc::clone(unit),
                        Arc::clone(&u.loader),
                        u.props(),
                        u.timeouts.load,
                        self.clone(),
                    )
                    .boxed()
                    .shared();
                    u.pending_load = Some(fut.clone());
                    fut
                }
            }
        };
        let _ = pending.await;
    }

    /// Run the initialize phase if the unit is waiting for it.
    pub(crate) async fn initialize(&self, unit: &SharedUnit) {
        let (f, props, budget, name) = {
            let mut u = unit.lock().await;
            if u.state != UnitState::NotBootstrapped {
                return;
            }
            let Some(lifecycles) = u.lifecycles.clone() else {
                error!(unit = %u.name, "loaded unit carries no lifecycle functions");
                return;
            };
            self.apply(&mut u, UnitEvent::InitializeStarted);
            (
                lifecycles.initialize,
                u.props(),
                u.timeouts.initialize,
                u.name.clone(),
            )
        };
        let result = run_phase(&name, Phase::Initialize, budget, f, props).await;
        let mut u = unit.lock().await;
        match result {
            Ok(()) => self.apply(&mut u, UnitEvent::InitializeSucceeded),
            Err(message) => self.apply(&mut u, UnitEvent::InitializeFailed(message)),
        }
    }

    /// Run the attach phase if the unit is initialized and not mounted.
    pub(crate) async fn attach(&self, unit: &SharedUnit) {
        let (f, props, budget, name) = {
            let mut u = unit.lock().await;
            if u.state != UnitState::NotMounted {
                return;
            }
            let Some(lifecycles) = u.lifecycles.clone() else {
                error!(unit = %u.name, "loaded unit carries no lifecycle functions");
                return;
            };
            self.apply(&mut u, UnitEvent::AttachStarted);
            (lifecycles.attach, u.props(), u.timeouts.attach, u.name.clone())
        };
        let result = run_phase(&name, Phase::Attach, budget, f, props).await;
        let mut u = unit.lock().await;
        match result {
            Ok(()) => self.apply(&mut u, UnitEvent::AttachSucceeded),
            Err(message) => self.apply(&mut u, UnitEvent::AttachFailed(message)),
        }
    }

    /// Run the detach phase if the unit is mounted.
    pub(crate) async fn detach(&self, unit: &SharedUnit) {
        let (f, props, budget, name) = {
            let mut u = unit.lock().await;
            if u.state != UnitState::Mounted {
                return;
            }
            let Some(lifecycles) = u.lifecycles.clone() else {
                error!(unit = %u.name, "loaded unit carries no lifecycle functions");
                return;
            };
            self.apply(&mut u, UnitEvent::DetachStarted);
            (lifecycles.detach, u.props(), u.timeouts.detach, u.name.clone())
        };
        let result = run_phase(&name, Phase::Detach, budget, f, props).await;
        let mut u = unit.lock().await;
        match result {
            Ok(()) => self.apply(&mut u, UnitEvent::DetachSucceeded),
            Err(message) => self.apply(&mut u, UnitEvent::DetachFailed(message)),
        }
    }
}

/// Invoke a composed phase function under its budget, flattening user-code
/// failures, panics, and hard timeout overruns into one error message.
///
/// The call runs as its own task: a hard overrun abandons it without
/// aborting it, and its eventual resolution is ignored.
pub(crate) async fn run_phase(
    name: &str,
    phase: Phase,
    budget: PhaseTimeout,
    f: LifecycleFn,
    props: UnitProps,
) -> std::result::Result<(), String> {
    let call = tokio::spawn(f(props));
    match reasonable_time(name, phase, budget, call).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(err))) => Err(err.to_string()),
        Ok(Err(join_err)) => Err(format!("{phase} call panicked: {join_err}")),
        Err(overrun) => Err(overrun.to_string()),
    }
}

async fn perform_load(
    unit: SharedUnit,
    loader: Arc<dyn UnitLoader>,
    props: UnitProps,
    budget: PhaseTimeout,
    executor: LifecycleExecutor,
) -> LoadOutcome {
    let name = props.name.clone();
    let call = tokio::spawn({
        let loader = Arc::clone(&loader);
        let props = props.clone();
        async move { loader.load(&props).await }
    });
    let loaded = reasonable_time(&name, Phase::Load, budget, call).await;

    let mut u = unit.lock().await;
    u.pending_load = None;
    let outcome = match loaded {
        // A hard load overrun is indistinguishable from a slow network.
        Err(overrun) => Err(LoadUnitError::transient(overrun.to_string())),
        // A panicking loader is a caller defect, like a malformed export.
        Ok(Err(join_err)) => Err(LoadUnitError::fatal(format!("loader panicked: {join_err}"))),
        Ok(Ok(Err(err))) => Err(err),
        Ok(Ok(Ok(exports))) => match exports.normalize() {
            Ok(lifecycles) => {
                u.lifecycles = Some(lifecycles);
                Ok(())
            }
            Err(reason) => Err(LoadUnitError::fatal(reason)),
        },
    };

    match &outcome {
        Ok(()) => {
            u.load_error_at = None;
            executor.apply(&mut u, UnitEvent::LoadSucceeded);
        }
        Err(err) => {
            if err.kind() == LoadFailureKind::Transient {
                u.load_error_at = Some(Instant::now());
            }
            executor.apply(
                &mut u,
                UnitEvent::LoadFailed {
                    kind: err.kind(),
                    message: err.to_string(),
                },
            );
        }
    }
    outcome
}
