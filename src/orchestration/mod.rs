// Reconciliation planning, the unload coordinator, and the host-facing
// Composer that drives passes.

pub mod orchestrator;
pub(crate) mod reconciler;
pub(crate) mod unload;

pub use orchestrator::{Composer, UnloadOpts};
