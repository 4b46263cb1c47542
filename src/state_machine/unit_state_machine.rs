//! Pure transition table for the unit lifecycle state graph.
//!
//! Every state mutation in the crate goes through [`transition`], so an
//! observed state sequence is always a legal walk of the graph: no skipped
//! intermediate states, and no way out of the `SkipBecauseBroken`
//! quarantine short of unregistration.

use super::errors::{TransitionError, TransitionResult};
use super::events::{LoadFailureKind, UnitEvent};
use super::states::UnitState;

/// Determine the target state for an event, or reject the edge.
pub fn transition(current: UnitState, event: &UnitEvent) -> TransitionResult {
    use UnitEvent as E;
    use UnitState as S;

    let target = match (current, event) {
        // Load: idempotent retry entry from LoadError after quarantine
        (S::NotLoaded | S::LoadError, E::LoadStarted) => S::LoadingSourceCode,
        (S::LoadingSourceCode, E::LoadSucceeded) => S::NotBootstrapped,
        (
            S::LoadingSourceCode,
            E::LoadFailed {
                kind: LoadFailureKind::Transient,
                ..
            },
        ) => S::LoadError,
        (
            S::LoadingSourceCode,
            E::LoadFailed {
                kind: LoadFailureKind::Fatal,
                ..
            },
        ) => S::SkipBecauseBroken,

        // Initialize
        (S::NotBootstrapped, E::InitializeStarted) => S::Bootstrapping,
        (S::Bootstrapping, E::InitializeSucceeded) => S::NotMounted,
        (S::Bootstrapping, E::InitializeFailed(_)) => S::SkipBecauseBroken,

        // Attach
        (S::NotMounted, E::AttachStarted) => S::Mounting,
        (S::Mounting, E::AttachSucceeded) => S::Mounted,
        (S::Mounting, E::AttachFailed(_)) => S::SkipBecauseBroken,

        // Detach
        (S::Mounted, E::DetachStarted) => S::Unmounting,
        (S::Unmounting, E::DetachSucceeded) => S::NotMounted,
        (S::Unmounting, E::DetachFailed(_)) => S::SkipBecauseBroken,

        // Release: legal from either loaded-but-inactive state, and from
        // LoadError (the user phase is skipped there).
        (S::NotBootstrapped | S::NotMounted | S::LoadError, E::ReleaseStarted) => S::Unloading,
        (S::Unloading, E::ReleaseSucceeded) => S::NotLoaded,
        (S::Unloading, E::ReleaseFailed(_)) => S::SkipBecauseBroken,

        (from, event) => {
            return Err(TransitionError {
                from,
                event: event.event_type(),
            })
        }
    };

    Ok(target)
}
