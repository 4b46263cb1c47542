//! # Loader Collaborator
//!
//! Fetching and evaluating a unit's code is the host's business. The core
//! consumes it through [`UnitLoader`] and only cares how a failure is
//! classified: transient failures land the unit in `LoadError` and are
//! retried after the quarantine window; fatal ones (a defective loader,
//! a malformed export) quarantine the unit permanently.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::exports::{UnitExports, UnitProps};
use crate::state_machine::LoadFailureKind;

/// Why a load attempt failed.
#[derive(Error, Debug, Clone)]
pub enum LoadUnitError {
    #[error("transient load failure: {reason}")]
    Transient { reason: String },

    #[error("loader defect: {reason}")]
    Fatal { reason: String },
}

impl LoadUnitError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal {
            reason: reason.into(),
        }
    }

    pub(crate) fn kind(&self) -> LoadFailureKind {
        match self {
            Self::Transient { .. } => LoadFailureKind::Transient,
            Self::Fatal { .. } => LoadFailureKind::Fatal,
        }
    }
}

/// Fetches a unit's lifecycle exports.
#[async_trait]
pub trait UnitLoader: Send + Sync {
    async fn load(&self, props: &UnitProps) -> std::result::Result<UnitExports, LoadUnitError>;
}

struct FnLoader<F>(F);

#[async_trait]
impl<F, Fut> UnitLoader for FnLoader<F>
where
    F: Fn(UnitProps) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<UnitExports, LoadUnitError>> + Send,
{
    async fn load(&self, props: &UnitProps) -> std::result::Result<UnitExports, LoadUnitError> {
        (self.0)(props.clone()).await
    }
}

/// Wrap an async closure as a [`UnitLoader`].
pub fn loader_fn<F, Fut>(f: F) -> Arc<dyn UnitLoader>
where
    F: Fn(UnitProps) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<UnitExports, LoadUnitError>> + Send + 'static,
{
    Arc::new(FnLoader(f))
}
