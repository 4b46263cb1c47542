//! # Unit Exports
//!
//! What a loader resolves with: up to four lifecycle phases, each either a
//! single function or an ordered sequence of functions. The variant shape
//! is normalized once at load time into one composed async function per
//! phase; nothing downstream ever sees the variant.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

/// Capability object handed to every lifecycle call: the unit's identity
/// plus the caller-owned custom properties, cloned per call and never
/// mutated by the core.
#[derive(Debug, Clone)]
pub struct UnitProps {
    pub name: String,
    pub custom: Value,
}

/// A composed lifecycle phase function.
pub type LifecycleFn =
    Arc<dyn Fn(UnitProps) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`LifecycleFn`].
pub fn lifecycle_fn<F, Fut>(f: F) -> LifecycleFn
where
    F: Fn(UnitProps) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |props| f(props).boxed())
}

fn noop() -> LifecycleFn {
    Arc::new(|_| async { Ok(()) }.boxed())
}

/// A phase as exported by a loader: one function, or an ordered sequence
/// composed sequentially.
#[derive(Clone)]
pub enum PhaseExport {
    Single(LifecycleFn),
    Sequence(Vec<LifecycleFn>),
}

impl PhaseExport {
    pub fn single<F, Fut>(f: F) -> Self
    where
        F: Fn(UnitProps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::Single(lifecycle_fn(f))
    }

    pub fn sequence(fns: Vec<LifecycleFn>) -> Self {
        Self::Sequence(fns)
    }

    /// Flatten into one function. A sequence runs in order, stopping at the
    /// first failure; an empty sequence composes to a no-op.
    fn compose(self) -> LifecycleFn {
        match self {
            Self::Single(f) => f,
            Self::Sequence(fns) => {
                let fns: Arc<[LifecycleFn]> = fns.into();
                Arc::new(move |props| {
                    let fns = Arc::clone(&fns);
                    async move {
                        for f in fns.iter() {
                            f(props.clone()).await?;
                        }
                        Ok(())
                    }
                    .boxed()
                })
            }
        }
    }
}

impl From<LifecycleFn> for PhaseExport {
    fn from(f: LifecycleFn) -> Self {
        Self::Single(f)
    }
}

/// The object a [`UnitLoader`] resolves with.
///
/// `attach` and `detach` are mandatory; resolving without either is a
/// malformed export and quarantines the unit. `initialize` and `release`
/// default to no-ops.
///
/// [`UnitLoader`]: super::loader::UnitLoader
#[derive(Clone, Default)]
pub struct UnitExports {
    pub initialize: Option<PhaseExport>,
    pub attach: Option<PhaseExport>,
    pub detach: Option<PhaseExport>,
    pub release: Option<PhaseExport>,
}

impl UnitExports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initialize(mut self, phase: impl Into<PhaseExport>) -> Self {
        self.initialize = Some(phase.into());
        self
    }

    pub fn with_attach(mut self, phase: impl Into<PhaseExport>) -> Self {
        self.attach = Some(phase.into());
        self
    }

    pub fn with_detach(mut self, phase: impl Into<PhaseExport>) -> Self {
        self.detach = Some(phase.into());
        self
    }

    pub fn with_release(mut self, phase: impl Into<PhaseExport>) -> Self {
        self.release = Some(phase.into());
        self
    }

    /// Validate and flatten into per-phase composed functions.
    pub(crate) fn normalize(self) -> std::result::Result<UnitLifecycles, String> {
        let attach = self
            .attach
            .ok_or_else(|| "loader result does not export an attach phase".to_string())?;
        let detach = self
            .detach
            .ok_or_else(|| "loader result does not export a detach phase".to_string())?;
        Ok(UnitLifecycles {
            initialize: self.initialize.map_or_else(noop, PhaseExport::compose),
            attach: attach.compose(),
            detach: detach.compose(),
            release: self.release.map_or_else(noop, PhaseExport::compose),
        })
    }
}

/// Normalized lifecycle functions bound to a loaded unit.
#[derive(Clone)]
pub struct UnitLifecycles {
    pub initialize: LifecycleFn,
    pub attach: LifecycleFn,
    pub detach: LifecycleFn,
    pub release: LifecycleFn,
}
