//! End-to-end orchestration scenarios driven through the public API only.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use composer_core::{
    activity_fn, lifecycle_fn, loader_fn, path_prefix, Composer, ComposerError, LoadUnitError,
    MemoryRouter, RoutingProvider, UnitExports, UnitLoader, UnitRegistration, UnitState,
    UnloadOpts,
};

fn working_loader() -> Arc<dyn UnitLoader> {
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
async fn navigation_mounts_and_unmounts_units() {
    let router = Arc::new(MemoryRouter::new("/"));
    let composer = Composer::new(Arc::clone(&router) as Arc<dyn RoutingProvider>);

    composer.register(registration("shop", "/shop")).await.unwrap();
    composer.register(registration("account", "/account")).await.unwrap();
    composer.start().await;
    assert!(composer.active_unit_names().await.is_empty());

    router.navigate("/shop/cart");
    composer.trigger().await;
    assert_eq!(composer.active_unit_names().await, vec!["shop"]);

    router.navigate("/account");
    composer.trigger().await;
    assert_eq!(composer.active_unit_names().await, vec!["account"]);
    assert_eq!(
        composer.unit_state("shop").await,
        Some(UnitState::NotMounted)
    );
}

#[tokio::test]
async fn malformed_exports_quarantine_only_the_offender() {
    let router = Arc::new(MemoryRouter::new("/app"));
    let composer = Composer::new(Arc::clone(&router) as Arc<dyn RoutingProvider>);

    // Resolves without a detach export.
    let malformed = loader_fn(|_| async {
        Ok(UnitExports::new().with_attach(lifecycle_fn(|_| async { Ok(()) })))
    });
    composer
        .register(UnitRegistration::new("broken", malformed, path_prefix("/app")))
        .await
        .unwrap();
    composer.register(registration("healthy", "/app")).await.unwrap();
    composer.start().await;

    assert_eq!(
        composer.unit_state("broken").await,
        Some(UnitState::SkipBecauseBroken)
    );
    assert_eq!(composer.active_unit_names().await, vec!["healthy"]);
}

#[tokio::test(start_paused = true)]
async fn transient_load_failure_retries_after_quarantine() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let loader = {
        let attempts = Arc::clone(&attempts);
        loader_fn(move |_| {
            let attempts = Arc::clone(&attempts);
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(LoadUnitError::transient("cdn hiccup"))
                } else {
                    Ok(UnitExports::new()
                        .with_attach(lifecycle_fn(|_| async { Ok(()) }))
                        .with_detach(lifecycle_fn(|_| async { Ok(()) })))
                }
            }
        })
    };

    let router = Arc::new(MemoryRouter::new("/shop"));
    let composer = Composer::new(Arc::clone(&router) as Arc<dyn RoutingProvider>);
    composer
        .register(UnitRegistration::new("shop", loader, path_prefix("/shop")))
        .await
        .unwrap();
    composer.start().await;

    // First attempt failed; retriggering inside the quarantine window must
    // not hammer the loader.
    assert_eq!(composer.unit_state("shop").await, Some(UnitState::LoadError));
    composer.trigger().await;
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(250)).await;
    composer.trigger().await;
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(composer.active_unit_names().await, vec!["shop"]);
}

#[tokio::test]
async fn concurrent_unload_requests_share_one_release() {
    let releases = Arc::new(AtomicUsize::new(0));
    let loader = {
        let releases = Arc::clone(&releases);
        loader_fn(move |_| {
            let releases = Arc::clone(&releases);
            async move {
                Ok(UnitExports::new()
                    .with_attach(lifecycle_fn(|_| async { Ok(()) }))
                    .with_detach(lifecycle_fn(|_| async { Ok(()) }))
                    .with_release(lifecycle_fn(move |_| {
                        let releases = Arc::clone(&releases);
                        async move {
                            releases.fetch_add(1, Ordering::SeqCst);
                            tokio::task::yield_now().await;
                            Ok(())
                        }
                    })))
            }
        })
    };

    let router = Arc::new(MemoryRouter::new("/shop"));
    let composer = Composer::new(Arc::clone(&router) as Arc<dyn RoutingProvider>);
    composer
        .register(UnitRegistration::new("shop", loader, path_prefix("/shop")))
        .await
        .unwrap();
    composer.start().await;
    assert_eq!(composer.active_unit_names().await, vec!["shop"]);

    // Stop remounting after the release resolves.
    router.navigate("/");
    composer.trigger().await;

    let (a, b) = tokio::join!(
        composer.request_unload("shop", UnloadOpts::default()),
        composer.request_unload("shop", UnloadOpts::default()),
    );
    a.unwrap();
    b.unwrap();
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    assert_eq!(composer.unit_state("shop").await, Some(UnitState::NotLoaded));
}

#[tokio::test]
async fn deferred_unload_waits_for_natural_detach() {
    let router = Arc::new(MemoryRouter::new("/shop"));
    let composer = Composer::new(Arc::clone(&router) as Arc<dyn RoutingProvider>);
    composer.register(registration("shop", "/shop")).await.unwrap();
    composer.start().await;
    assert_eq!(composer.active_unit_names().await, vec!["shop"]);

    let deferred = {
        let composer = composer.clone();
        tokio::spawn(async move {
            composer
                .request_unload(
                    "shop",
                    UnloadOpts {
                        wait_for_detach: true,
                    },
                )
                .await
        })
    };

    // Navigating away detaches the unit, which lets the pending release
    // through.
    router.navigate("/");
    composer.trigger().await;

    deferred.await.unwrap().unwrap();
    assert_eq!(composer.unit_state("shop").await, Some(UnitState::NotLoaded));
}

#[tokio::test]
async fn concurrent_triggers_are_idempotent() {
    let attach_calls = Arc::new(AtomicUsize::new(0));
    let loader = {
        let attach_calls = Arc::clone(&attach_calls);
        loader_fn(move |_| {
            let attach_calls = Arc::clone(&attach_calls);
            async move {
                Ok(UnitExports::new()
                    .with_attach(lifecycle_fn(move |_| {
                        let attach_calls = Arc::clone(&attach_calls);
                        async move {
                            attach_calls.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }
                    }))
                    .with_detach(lifecycle_fn(|_| async { Ok(()) })))
            }
        })
    };

    let router = Arc::new(MemoryRouter::new("/shop"));
    let composer = Composer::new(Arc::clone(&router) as Arc<dyn RoutingProvider>);
    composer
        .register(UnitRegistration::new("shop", loader, path_prefix("/shop")))
        .await
        .unwrap();
    composer.start().await;

    tokio::join!(
        composer.trigger(),
        composer.trigger(),
        composer.trigger(),
        composer.trigger(),
    );
    assert_eq!(attach_calls.load(Ordering::SeqCst), 1);
    assert_eq!(composer.active_unit_names().await, vec!["shop"]);
}

#[tokio::test]
async fn settled_leaves_active_units_mounted_or_quarantined() {
    let failing = loader_fn(|_| async {
        Ok(UnitExports::new()
            .with_attach(lifecycle_fn(|_| async {
                Err(anyhow::anyhow!("container missing"))
            }))
            .with_detach(lifecycle_fn(|_| async { Ok(()) })))
    });

    let router = Arc::new(MemoryRouter::new("/app"));
    let composer = Composer::new(Arc::clone(&router) as Arc<dyn RoutingProvider>);
    composer.register(registration("a", "/app")).await.unwrap();
    composer
        .register(UnitRegistration::new("b", failing, path_prefix("/app")))
        .await
        .unwrap();
    composer.register(registration("c", "/app")).await.unwrap();
    composer.start().await;
    composer.settled().await;

    for name in ["a", "b", "c"] {
        let state = composer.unit_state(name).await.unwrap();
        assert!(
            matches!(state, UnitState::Mounted | UnitState::SkipBecauseBroken),
            "unit {name} settled in {state}"
        );
    }
    assert_eq!(composer.active_unit_names().await, vec!["a", "c"]);
}

#[tokio::test]
async fn duplicate_names_are_rejected() {
    let composer = Composer::new(Arc::new(MemoryRouter::default()));
    composer.register(registration("shop", "/shop")).await.unwrap();
    let err = composer
        .register(registration("shop", "/other"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ComposerError::DuplicateName {
            name: "shop".to_string()
        }
    );
    assert_eq!(composer.unit_names().await, vec!["shop"]);
}

#[tokio::test]
async fn empty_names_are_rejected() {
    let composer = Composer::new(Arc::new(MemoryRouter::default()));
    let err = composer
        .register(UnitRegistration::new(
            "  ",
            working_loader(),
            activity_fn(|_| true),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, ComposerError::InvalidRegistration { .. }));
}

#[tokio::test]
async fn unregistering_a_quarantined_unit_succeeds() {
    let fatal = loader_fn(|_| async { Err(LoadUnitError::fatal("bad manifest")) });
    let router = Arc::new(MemoryRouter::new("/shop"));
    let composer = Composer::new(Arc::clone(&router) as Arc<dyn RoutingProvider>);
    composer
        .register(UnitRegistration::new("shop", fatal, path_prefix("/shop")))
        .await
        .unwrap();
    composer.start().await;
    assert_eq!(
        composer.unit_state("shop").await,
        Some(UnitState::SkipBecauseBroken)
    );

    composer.unregister("shop").await.unwrap();
    assert_eq!(composer.unit_state("shop").await, None);
}

#[tokio::test]
async fn lifecycle_events_describe_the_mount_walk() {
    let router = Arc::new(MemoryRouter::new("/shop"));
    let composer = Composer::new(Arc::clone(&router) as Arc<dyn RoutingProvider>);
    let mut events = composer.subscribe_events();

    composer.register(registration("shop", "/shop")).await.unwrap();
    composer.start().await;

    let mut observed = Vec::new();
    while observed.last() != Some(&UnitState::Mounted) {
        let event = events.recv().await.unwrap();
        assert_eq!(event.unit, "shop");
        assert!(event.error.is_none());
        observed.push(event.to);
    }
    assert_eq!(
        observed,
        vec![
            UnitState::LoadingSourceCode,
            UnitState::NotBootstrapped,
            UnitState::Bootstrapping,
            UnitState::NotMounted,
            UnitState::Mounting,
            UnitState::Mounted,
        ]
    );
}

#[tokio::test]
async fn failing_activity_predicate_counts_as_inactive() {
    let flaky: composer_core::ActivityFn =
        Arc::new(|ctx| match ctx.path.as_str() {
            "/boom" => Err(anyhow::anyhow!("predicate crashed")),
            path => Ok(path.starts_with("/shop")),
        });

    let router = Arc::new(MemoryRouter::new("/shop"));
    let composer = Composer::new(Arc::clone(&router) as Arc<dyn RoutingProvider>);
    composer
        .register(UnitRegistration::new("shop", working_loader(), flaky))
        .await
        .unwrap();
    composer.start().await;
    assert_eq!(composer.active_unit_names().await, vec!["shop"]);

    // The failure detaches the unit for this evaluation only.
    router.navigate("/boom");
    composer.trigger().await;
    assert!(composer.active_unit_names().await.is_empty());

    router.navigate("/shop");
    composer.trigger().await;
    assert_eq!(composer.active_unit_names().await, vec!["shop"]);
}
