//! # Routing Collaborator
//!
//! The core never touches browser history itself. A host supplies a
//! [`RoutingProvider`]: a fresh [`RoutingContext`] on demand plus a
//! broadcast stream of change notifications the orchestrator subscribes to
//! at construction. [`MemoryRouter`] is the in-process implementation used
//! by hosts that drive navigation explicitly (and by the test suite).

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Location information activity predicates are evaluated against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingContext {
    pub path: String,
    pub query: Option<String>,
    pub hash: Option<String>,
}

impl RoutingContext {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: None,
            hash: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Notification that the routing context changed.
#[derive(Debug, Clone)]
pub struct RoutingChange {
    pub context: RoutingContext,
}

/// Source of routing state and routing-change notifications.
pub trait RoutingProvider: Send + Sync {
    /// The current location, read fresh at the start of every pass.
    fn current_context(&self) -> RoutingContext;

    /// Subscribe to change notifications.
    fn changes(&self) -> broadcast::Receiver<RoutingChange>;
}

/// Fallible activity predicate. Evaluation failures are logged and treated
/// as "not active" for that evaluation only.
pub type ActivityFn = Arc<dyn Fn(&RoutingContext) -> anyhow::Result<bool> + Send + Sync>;

/// Wrap an infallible predicate closure.
pub fn activity_fn<F>(f: F) -> ActivityFn
where
    F: Fn(&RoutingContext) -> bool + Send + Sync + 'static,
{
    Arc::new(move |ctx| Ok(f(ctx)))
}

/// Predicate matching any path under the given prefix.
///
/// A convenience constructor, not a pattern language: hosts with richer
/// routing rules supply their own closure.
pub fn path_prefix(prefix: impl Into<String>) -> ActivityFn {
    let mut prefix = prefix.into();
    if !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    Arc::new(move |ctx| Ok(ctx.path.starts_with(&prefix)))
}

/// In-process routing provider driven by explicit [`navigate`] calls.
///
/// [`navigate`]: MemoryRouter::navigate
pub struct MemoryRouter {
    current: RwLock<RoutingContext>,
    sender: broadcast::Sender<RoutingChange>,
}

impl MemoryRouter {
    pub fn new(initial_path: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(64);
        Self {
            current: RwLock::new(RoutingContext::new(initial_path)),
            sender,
        }
    }

    /// Replace the current context and notify subscribers.
    pub fn navigate(&self, path: impl Into<String>) {
        let context = RoutingContext::new(path);
        *self.current.write() = context.clone();
        debug!(path = %context.path, "routing context changed");
        // No subscribers is acceptable; nothing is listening before start.
        let _ = self.sender.send(RoutingChange { context });
    }
}

impl Default for MemoryRouter {
    fn default() -> Self {
        Self::new("/")
    }
}

impl RoutingProvider for MemoryRouter {
    fn current_context(&self) -> RoutingContext {
        self.current.read().clone()
    }

    fn changes(&self) -> broadcast::Receiver<RoutingChange> {
        self.sender.subscribe()
    }
}
