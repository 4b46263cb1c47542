// Lifecycle execution: loader seam, export normalization, timeout policy,
// and the executor that drives phases under it.

pub mod executor;
pub mod exports;
pub mod loader;
pub mod timeouts;

pub use exports::{lifecycle_fn, LifecycleFn, PhaseExport, UnitExports, UnitLifecycles, UnitProps};
pub use loader::{loader_fn, LoadUnitError, UnitLoader};
pub use timeouts::{Phase, PhaseTimeout, PhaseTimeouts};
