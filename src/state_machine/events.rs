use serde::{Deserialize, Serialize};

/// Why a load attempt failed, which decides the target state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadFailureKind {
    /// Network/resource failure; retried after the quarantine window.
    Transient,
    /// Malformed export or loader defect; never retried automatically.
    Fatal,
}

/// Events that drive unit state transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum UnitEvent {
    LoadStarted,
    LoadSucceeded,
    LoadFailed {
        kind: LoadFailureKind,
        message: String,
    },
    InitializeStarted,
    InitializeSucceeded,
    InitializeFailed(String),
    AttachStarted,
    AttachSucceeded,
    AttachFailed(String),
    DetachStarted,
    DetachSucceeded,
    DetachFailed(String),
    ReleaseStarted,
    ReleaseSucceeded,
    ReleaseFailed(String),
}

impl UnitEvent {
    /// String representation of the event type for logging.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::LoadStarted => "load_started",
            Self::LoadSucceeded => "load_succeeded",
            Self::LoadFailed { .. } => "load_failed",
            Self::InitializeStarted => "initialize_started",
            Self::InitializeSucceeded => "initialize_succeeded",
            Self::InitializeFailed(_) => "initialize_failed",
            Self::AttachStarted => "attach_started",
            Self::AttachSucceeded => "attach_succeeded",
            Self::AttachFailed(_) => "attach_failed",
            Self::DetachStarted => "detach_started",
            Self::DetachSucceeded => "detach_succeeded",
            Self::DetachFailed(_) => "detach_failed",
            Self::ReleaseStarted => "release_started",
            Self::ReleaseSucceeded => "release_succeeded",
            Self::ReleaseFailed(_) => "release_failed",
        }
    }

    /// Extract the error message if this is a failure event.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::LoadFailed { message, .. } => Some(message),
            Self::InitializeFailed(msg)
            | Self::AttachFailed(msg)
            | Self::DetachFailed(msg)
            | Self::ReleaseFailed(msg) => Some(msg),
            _ => None,
        }
    }
}
