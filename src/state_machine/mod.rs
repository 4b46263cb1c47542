// State machine module for unit lifecycle management
//
// Pure state/event/transition definitions; all mutation of a unit's state
// elsewhere in the crate funnels through `transition`.

pub mod errors;
pub mod events;
pub mod states;
pub mod unit_state_machine;

pub use errors::{TransitionError, TransitionResult};
pub use events::{LoadFailureKind, UnitEvent};
pub use states::UnitState;
pub use unit_state_machine::transition;
