//! # Composer Core
//!
//! Lifecycle orchestration for route-driven micro-frontend units. Hosts
//! register units (a name, an async loader, and an activity predicate) and
//! the [`Composer`] keeps each one in the lifecycle state the current
//! routing context calls for: loading source, initializing, attaching,
//! detaching, and releasing as navigation moves across the application.
//!
//! ## Architecture
//!
//! - **State machine** ([`state_machine`]): the pure transition table every
//!   unit state change flows through. Illegal edges are unrepresentable.
//! - **Registry** ([`registry`]): ordered storage of registered units
//!   behind per-unit locks.
//! - **Lifecycle** ([`lifecycle`]): the loader seam, export normalization,
//!   per-phase timeout budgets, and the executor that runs user-supplied
//!   transition functions.
//! - **Orchestration** ([`orchestration`]): single-flight reconciliation
//!   passes that classify units into load/attach/detach/release work and
//!   execute the chains, teardown before buildup.
//! - **Routing** ([`routing`]): the collaborator seam; the core never
//!   touches navigation state itself.
//! - **Events** ([`events`]): broadcast stream of observed transitions,
//!   the diagnostic surface for routing-driven failures.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use composer_core::{
//!     lifecycle_fn, loader_fn, path_prefix, Composer, MemoryRouter,
//!     RoutingProvider, UnitExports, UnitRegistration,
//! };
//!
//! # async fn run() -> composer_core::Result<()> {
//! let router = Arc::new(MemoryRouter::new("/"));
//! let composer = Composer::new(Arc::clone(&router) as Arc<dyn RoutingProvider>);
//!
//! composer
//!     .register(UnitRegistration::new(
//!         "shop",
//!         loader_fn(|_| async {
//!             Ok(UnitExports::new()
//!                 .with_attach(lifecycle_fn(|_| async { Ok(()) }))
//!                 .with_detach(lifecycle_fn(|_| async { Ok(()) })))
//!         }),
//!         path_prefix("/shop"),
//!     ))
//!     .await?;
//!
//! composer.start().await;
//! router.navigate("/shop/cart");
//! composer.trigger().await;
//! assert_eq!(composer.active_unit_names().await, vec!["shop"]);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod logging;
pub mod orchestration;
pub mod registry;
pub mod routing;
pub mod state_machine;

pub use config::ComposerConfig;
pub use error::{ComposerError, Result};
pub use events::{EventPublisher, LifecycleEvent};
pub use lifecycle::{
    lifecycle_fn, loader_fn, LifecycleFn, LoadUnitError, Phase, PhaseExport, PhaseTimeout,
    PhaseTimeouts, UnitExports, UnitLoader, UnitProps,
};
pub use logging::init_structured_logging;
pub use orchestration::{Composer, UnloadOpts};
pub use registry::UnitRegistration;
pub use routing::{
    activity_fn, path_prefix, ActivityFn, MemoryRouter, RoutingChange, RoutingContext,
    RoutingProvider,
};
pub use state_machine::UnitState;
