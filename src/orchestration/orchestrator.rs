//! # Composer
//!
//! The host-facing orchestrator. Owns the registry, subscribes to routing
//! changes, and runs reconciliation passes that drive every unit toward the
//! state the current routing context calls for.
//!
//! Passes are single-flight: at most one runs at a time, and any trigger
//! arriving mid-pass schedules a rerun instead of interleaving. Chains for
//! distinct units inside one pass run concurrently; detaches and releases
//! always complete before loads and attaches begin.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::reconciler::{plan, UnitSnapshot};
use super::unload::{try_release, UnloadCoordinator};
use crate::config::ComposerConfig;
use crate::error::{ComposerError, Result};
use crate::events::{EventPublisher, LifecycleEvent};
use crate::lifecycle::executor::LifecycleExecutor;
use crate::registry::{SharedUnit, Unit, UnitRegistration, UnitRegistry};
use crate::routing::{RoutingContext, RoutingProvider};
use crate::state_machine::UnitState;

/// Options for [`Composer::request_unload`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UnloadOpts {
    /// When set, the unit is only released after routing deactivates it and
    /// its detach completes naturally. When unset (the default) the unit is
    /// detached and released immediately, active or not.
    pub wait_for_detach: bool,
}

struct ComposerInner {
    registry: UnitRegistry,
    coordinator: UnloadCoordinator,
    executor: LifecycleExecutor,
    routing: Arc<dyn RoutingProvider>,
    config: ComposerConfig,
    publisher: EventPublisher,
    started: AtomicBool,
    pass_running: AtomicBool,
    rerun_requested: AtomicBool,
    idle: Notify,
}

/// Cheap cloneable handle to the orchestration core.
///
/// Construct inside a tokio runtime: the routing listener task is spawned
/// at construction.
#[derive(Clone)]
pub struct Composer {
    inner: Arc<ComposerInner>,
}

impl Composer {
    pub fn new(routing: Arc<dyn RoutingProvider>) -> Self {
        Self::with_config(routing, ComposerConfig::default())
    }

    pub fn with_config(routing: Arc<dyn RoutingProvider>, config: ComposerConfig) -> Self {
        let publisher = EventPublisher::new(config.event_channel_capacity);
        let inner = Arc::new(ComposerInner {
            registry: UnitRegistry::new(),
            coordinator: UnloadCoordinator::new(),
            executor: LifecycleExecutor::new(publisher.clone()),
            routing,
            config,
            publisher,
            started: AtomicBool::new(false),
            pass_running: AtomicBool::new(false),
            rerun_requested: AtomicBool::new(false),
            idle: Notify::new(),
        });
        spawn_routing_listener(&inner);
        Self { inner }
    }

    /// Register a unit and reconcile. If the composer is started and the
    /// unit is active for the current routing context, it is mounted before
    /// this returns.
    pub async fn register(&self, registration: UnitRegistration) -> Result<()> {
        registration.validate()?;
        let unit = Unit::new(registration, self.inner.config.timeouts);
        let name = unit.name().to_string();
        self.inner.registry.register(unit).await?;
        info!(unit = %name, "unit registered");
        self.trigger().await;
        Ok(())
    }

    /// Begin mounting. Until `start` is called, passes load active units'
    /// source but never initialize or attach them. Idempotent.
    pub async fn start(&self) {
        if !self.inner.started.swap(true, Ordering::SeqCst) {
            info!("composer started");
        }
        self.trigger().await;
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Force a reconciliation pass and wait for convergence: on return, no
    /// pass is running and none is scheduled.
    pub async fn trigger(&self) {
        self.inner.run_trigger().await;
        self.settled().await;
    }

    /// Wait until the orchestrator is idle. Passes started by the routing
    /// listener are covered too.
    pub async fn settled(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if !self.inner.pass_running.load(Ordering::SeqCst)
                && !self.inner.rerun_requested.load(Ordering::SeqCst)
            {
                return;
            }
            notified.await;
        }
    }

    /// Fully release a unit back to `NotLoaded`, waiting for the single
    /// underlying release to resolve. Concurrent requests for the same unit
    /// share one release. The unit stays registered; a later pass may load
    /// it again.
    pub async fn request_unload(&self, name: &str, opts: UnloadOpts) -> Result<()> {
        let unit = self.inner.registry.find(name).await.ok_or_else(|| {
            ComposerError::UnitNotFound {
                name: name.to_string(),
            }
        })?;
        let rx = self.inner.coordinator.request(name);

        if opts.wait_for_detach {
            // Nothing to detach: resolve now instead of waiting for a pass
            // that may never deactivate the unit.
            let state = unit.lock().await.state();
            if matches!(
                state,
                UnitState::NotLoaded | UnitState::SkipBecauseBroken | UnitState::LoadError
            ) {
                try_release(&self.inner.executor, &self.inner.coordinator, &unit).await;
            }
        } else {
            self.inner.force_release(&unit, rx.clone()).await;
        }
        self.inner.run_trigger().await;

        match UnloadCoordinator::wait(rx).await {
            Ok(()) => Ok(()),
            Err(reason) => Err(ComposerError::UnloadFailed {
                name: name.to_string(),
                reason,
            }),
        }
    }

    /// Release a unit and remove it from the registry. Removal happens
    /// before the follow-up pass, so an unregistered unit can never be
    /// remounted by its own teardown.
    pub async fn unregister(&self, name: &str) -> Result<()> {
        let unit = self.inner.registry.find(name).await.ok_or_else(|| {
            ComposerError::UnitNotFound {
                name: name.to_string(),
            }
        })?;
        let rx = self.inner.coordinator.request(name);
        self.inner.force_release(&unit, rx.clone()).await;
        let outcome = UnloadCoordinator::wait(rx).await;
        let result = match outcome {
            Ok(()) => self.inner.registry.remove(name).await,
            Err(reason) => Err(ComposerError::UnloadFailed {
                name: name.to_string(),
                reason,
            }),
        };
        self.inner.run_trigger().await;
        result
    }

    /// Names of all currently mounted units, in registration order.
    pub async fn active_unit_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for unit in self.inner.registry.all().await {
            let u = unit.lock().await;
            if u.state() == UnitState::Mounted {
                names.push(u.name().to_string());
            }
        }
        names
    }

    /// All registered names in registration order.
    pub async fn unit_names(&self) -> Vec<String> {
        self.inner.registry.names().await
    }

    pub async fn unit_state(&self, name: &str) -> Option<UnitState> {
        let unit = self.inner.registry.find(name).await?;
        let state = unit.lock().await.state();
        Some(state)
    }

    /// Names whose activity predicate matches `ctx`, independent of current
    /// lifecycle state. Lets hosts answer "what would run here" without
    /// navigating.
    pub async fn names_matching(&self, ctx: &RoutingContext) -> Vec<String> {
        let mut names = Vec::new();
        for unit in self.inner.registry.all().await {
            let u = unit.lock().await;
            match (u.activity)(ctx) {
                Ok(true) => names.push(u.name().to_string()),
                Ok(false) => {}
                Err(err) => {
                    warn!(unit = %u.name(), error = %err, "activity predicate failed");
                }
            }
        }
        names
    }

    /// Subscribe to lifecycle transition events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.publisher.subscribe()
    }

    pub fn config(&self) -> &ComposerConfig {
        &self.inner.config
    }
}

impl ComposerInner {
    /// Detach (if mounted) and release a unit immediately, regardless of
    /// routing activity. A unit mid-phase is retried after its next
    /// published transition; the retry races the request's own resolution
    /// so a concurrent resolver also terminates the loop.
    async fn force_release(
        &self,
        unit: &SharedUnit,
        mut resolution: tokio::sync::watch::Receiver<Option<std::result::Result<(), String>>>,
    ) {
        let mut events = self.publisher.subscribe();
        loop {
            self.executor.detach(unit).await;
            try_release(&self.executor, &self.coordinator, unit).await;
            if resolution.borrow_and_update().is_some() {
                return;
            }
            tokio::select! {
                _ = events.recv() => {}
                _ = resolution.changed() => return,
            }
        }
    }

    /// Run reconciliation passes until no more work is scheduled. If a pass
    /// is already running, the request coalesces into one rerun after the
    /// current pass; the rerun flag is always set before attempting to
    /// claim the pass, so a request can never be lost to the running
    /// owner's final check.
    async fn run_trigger(&self) {
        self.rerun_requested.store(true, Ordering::SeqCst);
        loop {
            if self
                .pass_running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                // The owner re-checks the rerun flag before going idle.
                return;
            }
            while self.rerun_requested.swap(false, Ordering::SeqCst) {
                self.run_pass().await;
            }
            self.pass_running.store(false, Ordering::SeqCst);
            if !self.rerun_requested.load(Ordering::SeqCst) {
                self.idle.notify_waiters();
                return;
            }
            // A request slipped in between the last swap and the release;
            // reclaim and serve it.
        }
    }

    /// One reconciliation pass: snapshot, classify, execute.
    async fn run_pass(&self) {
        let ctx = self.routing.current_context();
        let units = self.registry.all().await;

        let mut handles: HashMap<String, SharedUnit> = HashMap::with_capacity(units.len());
        let mut snapshots = Vec::with_capacity(units.len());
        for unit in &units {
            let u = unit.lock().await;
            snapshots.push(UnitSnapshot {
                name: u.name().to_string(),
                state: u.state(),
                active_now: u.should_be_active(&ctx),
                unload_requested: self.coordinator.is_requested(u.name()),
                load_error_age: u.load_error_at.map(|at| at.elapsed()),
            });
            handles.insert(u.name().to_string(), Arc::clone(unit));
        }

        let quarantine = Duration::from_millis(self.config.load_retry_quarantine_ms);
        let plan = plan(&snapshots, quarantine);
        if plan.is_empty() {
            return;
        }

        let resolve = |names: &[String]| -> Vec<SharedUnit> {
            names.iter().filter_map(|n| handles.get(n).cloned()).collect()
        };

        debug!(
            path = %ctx.path,
            to_load = plan.to_load.len(),
            to_attach = plan.to_attach.len(),
            to_detach = plan.to_detach.len(),
            to_release = plan.to_release.len(),
            "reconciliation pass"
        );

        if !self.started.load(Ordering::SeqCst) {
            // Before start, loading is the only permitted work.
            let loads = resolve(&plan.to_load);
            join_all(loads.iter().map(|u| self.load_chain(u))).await;
            return;
        }

        // Teardown strictly precedes buildup so two units sharing one mount
        // point never overlap.
        let detaches = resolve(&plan.to_detach);
        let releases = resolve(&plan.to_release);
        tokio::join!(
            join_all(detaches.iter().map(|u| self.detach_chain(u))),
            join_all(
                releases
                    .iter()
                    .map(|u| try_release(&self.executor, &self.coordinator, u))
            ),
        );

        let loads = resolve(&plan.to_load);
        let attaches = resolve(&plan.to_attach);
        tokio::join!(
            join_all(loads.iter().map(|u| self.load_chain(u))),
            join_all(attaches.iter().map(|u| self.attach_chain(u))),
        );
    }

    async fn load_chain(&self, unit: &SharedUnit) {
        self.executor.load(unit).await;
        // Once started, a freshly loaded active unit still needs
        // initialize and attach.
        if self.started.load(Ordering::SeqCst) {
            self.rerun_requested.store(true, Ordering::SeqCst);
        }
    }

    async fn attach_chain(&self, unit: &SharedUnit) {
        self.executor.initialize(unit).await;
        // Navigation during a slow initialize must not end in a stale
        // attach: re-read routing before committing.
        let ctx = self.routing.current_context();
        {
            let u = unit.lock().await;
            if u.state() != UnitState::NotMounted || !u.should_be_active(&ctx) {
                self.rerun_requested.store(true, Ordering::SeqCst);
                return;
            }
        }
        self.executor.attach(unit).await;
    }

    async fn detach_chain(&self, unit: &SharedUnit) {
        self.executor.detach(unit).await;
        try_release(&self.executor, &self.coordinator, unit).await;
        self.rerun_requested.store(true, Ordering::SeqCst);
    }
}

/// Background task that turns routing change notifications into passes.
/// Holds only a weak handle so dropping the last `Composer` stops it.
fn spawn_routing_listener(inner: &Arc<ComposerInner>) {
    let mut rx = inner.routing.changes();
    let weak = Arc::downgrade(inner);
    tokio::spawn(async move {
        loop {
            let trigger = match rx.recv().await {
                Ok(change) => {
                    debug!(path = %change.context.path, "routing change received");
                    true
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Only the latest context matters; a pass reads it
                    // fresh anyway.
                    warn!(skipped, "routing change stream lagged");
                    true
                }
                Err(broadcast::error::RecvError::Closed) => false,
            };
            if !trigger {
                break;
            }
            let Some(inner) = weak.upgrade() else { break };
            inner.run_trigger().await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::exports::{lifecycle_fn, UnitExports};
    use crate::lifecycle::loader::{loader_fn, LoadUnitError};
    use crate::routing::{path_prefix, MemoryRouter};
    use std::sync::atomic::AtomicUsize;

    fn working_loader() -> Arc<dyn crate::lifecycle::loader::UnitLoader> {
        loader_fn(|_| async {
            Ok(UnitExports::new()
                .with_attach(lifecycle_fn(|_| async { Ok(()) }))
                .with_detach(lifecycle_fn(|_| async { Ok(()) })))
        })
    }

    fn registration(name: &str, prefix: &str) -> UnitRegistration {
        UnitRegistration::new(name, working_loader(), path_prefix(prefix))
    }

    #[tokio::test]
    async fn register_before_start_loads_but_never_mounts() {
        let router = Arc::new(MemoryRouter::new("/shop"));
        let composer = Composer::new(router);
        composer.register(registration("shop", "/shop")).await.unwrap();
        assert_eq!(
            composer.unit_state("shop").await,
            Some(UnitState::NotBootstrapped)
        );
        assert!(composer.active_unit_names().await.is_empty());
    }

    #[tokio::test]
    async fn start_mounts_active_units() {
        let router = Arc::new(MemoryRouter::new("/shop"));
        let composer = Composer::new(router);
        composer.register(registration("shop", "/shop")).await.unwrap();
        composer.register(registration("account", "/account")).await.unwrap();
        composer.start().await;
        assert_eq!(composer.active_unit_names().await, vec!["shop"]);
        assert_eq!(
            composer.unit_state("account").await,
            Some(UnitState::NotLoaded)
        );
    }

    #[tokio::test]
    async fn navigation_swaps_mounted_units() {
        let router = Arc::new(MemoryRouter::new("/shop"));
        let composer = Composer::new(Arc::clone(&router) as Arc<dyn RoutingProvider>);
        composer.register(registration("shop", "/shop")).await.unwrap();
        composer.register(registration("account", "/account")).await.unwrap();
        composer.start().await;

        router.navigate("/account");
        composer.trigger().await;

        assert_eq!(composer.active_unit_names().await, vec!["account"]);
        assert_eq!(
            composer.unit_state("shop").await,
            Some(UnitState::NotMounted)
        );
    }

    #[tokio::test]
    async fn concurrent_triggers_converge() {
        let router = Arc::new(MemoryRouter::new("/shop"));
        let composer = Composer::new(router);
        composer.register(registration("shop", "/shop")).await.unwrap();
        composer.start().await;
        tokio::join!(composer.trigger(), composer.trigger(), composer.trigger());
        assert_eq!(composer.active_unit_names().await, vec!["shop"]);
    }

    #[tokio::test]
    async fn request_unload_returns_a_mounted_unit_to_not_loaded() {
        let router = Arc::new(MemoryRouter::new("/shop"));
        let composer = Composer::new(router);
        composer.register(registration("shop", "/shop")).await.unwrap();
        composer.start().await;
        assert_eq!(composer.active_unit_names().await, vec!["shop"]);

        composer
            .request_unload("shop", UnloadOpts::default())
            .await
            .unwrap();
        // Still registered and still active for the current path, so a
        // pass mounts it again from scratch.
        composer.trigger().await;
        assert_eq!(composer.active_unit_names().await, vec!["shop"]);
    }

    #[tokio::test]
    async fn unregister_removes_the_unit() {
        let router = Arc::new(MemoryRouter::new("/shop"));
        let composer = Composer::new(router);
        composer.register(registration("shop", "/shop")).await.unwrap();
        composer.start().await;
        composer.unregister("shop").await.unwrap();
        assert!(composer.unit_names().await.is_empty());
        assert_eq!(composer.unit_state("shop").await, None);
    }

    #[tokio::test]
    async fn unregister_unknown_unit_fails() {
        let composer = Composer::new(Arc::new(MemoryRouter::default()));
        let err = composer.unregister("ghost").await.unwrap_err();
        assert!(matches!(err, ComposerError::UnitNotFound { .. }));
    }

    #[tokio::test]
    async fn fatal_load_failure_quarantines_without_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = {
            let calls = Arc::clone(&calls);
            loader_fn(move |_| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(LoadUnitError::fatal("manifest rejected"))
                }
            })
        };
        let router = Arc::new(MemoryRouter::new("/shop"));
        let composer = Composer::new(router);
        composer
            .register(UnitRegistration::new("shop", loader, path_prefix("/shop")))
            .await
            .unwrap();
        composer.start().await;
        composer.trigger().await;
        assert_eq!(
            composer.unit_state("shop").await,
            Some(UnitState::SkipBecauseBroken)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn names_matching_evaluates_predicates_only() {
        let router = Arc::new(MemoryRouter::new("/"));
        let composer = Composer::new(router);
        composer.register(registration("shop", "/shop")).await.unwrap();
        composer.register(registration("account", "/account")).await.unwrap();
        let names = composer
            .names_matching(&RoutingContext::new("/account/settings"))
            .await;
        assert_eq!(names, vec!["account"]);
    }
}
