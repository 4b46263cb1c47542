use super::states::UnitState;
use thiserror::Error;

/// The requested event has no edge from the current state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no transition from '{from}' on '{event}'")]
pub struct TransitionError {
    pub from: UnitState,
    pub event: &'static str,
}

pub type TransitionResult = std::result::Result<UnitState, TransitionError>;
