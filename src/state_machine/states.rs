use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states a registered unit moves through.
///
/// Units cycle indefinitely along the state graph until unregistered; the
/// only sink-like state is [`SkipBecauseBroken`], a deliberate quarantine
/// that excludes the unit from reconciliation until it is unregistered.
///
/// [`SkipBecauseBroken`]: UnitState::SkipBecauseBroken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    /// Registered, source not yet fetched
    NotLoaded,
    /// Source fetch in flight
    LoadingSourceCode,
    /// Source loaded, initialize not yet run
    NotBootstrapped,
    /// Initialize in flight
    Bootstrapping,
    /// Initialized but not attached to the page
    NotMounted,
    /// Attach in flight
    Mounting,
    /// Attached and live
    Mounted,
    /// Detach in flight
    Unmounting,
    /// Release in flight
    Unloading,
    /// Source fetch failed for a transient reason; retried after quarantine
    LoadError,
    /// A lifecycle phase failed; permanently quarantined
    SkipBecauseBroken,
}

impl UnitState {
    /// Quarantined units never appear in any reconciliation bucket.
    pub fn is_broken(&self) -> bool {
        matches!(self, Self::SkipBecauseBroken)
    }

    /// A phase is in flight; the unit is skipped until it settles.
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            Self::LoadingSourceCode
                | Self::Bootstrapping
                | Self::Mounting
                | Self::Unmounting
                | Self::Unloading
        )
    }

    /// The unit is attached to the page.
    pub fn is_mounted(&self) -> bool {
        matches!(self, Self::Mounted)
    }

    /// The unit carries loaded lifecycle functions.
    pub fn is_loaded(&self) -> bool {
        !matches!(
            self,
            Self::NotLoaded | Self::LoadingSourceCode | Self::LoadError
        )
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotLoaded => write!(f, "not_loaded"),
            Self::LoadingSourceCode => write!(f, "loading_source_code"),
            Self::NotBootstrapped => write!(f, "not_bootstrapped"),
            Self::Bootstrapping => write!(f, "bootstrapping"),
            Self::NotMounted => write!(f, "not_mounted"),
            Self::Mounting => write!(f, "mounting"),
            Self::Mounted => write!(f, "mounted"),
            Self::Unmounting => write!(f, "unmounting"),
            Self::Unloading => write!(f, "unloading"),
            Self::LoadError => write!(f, "load_error"),
            Self::SkipBecauseBroken => write!(f, "skip_because_broken"),
        }
    }
}

impl std::str::FromStr for UnitState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "not_loaded" => Ok(Self::NotLoaded),
            "loading_source_code" => Ok(Self::LoadingSourceCode),
            "not_bootstrapped" => Ok(Self::NotBootstrapped),
            "bootstrapping" => Ok(Self::Bootstrapping),
            "not_mounted" => Ok(Self::NotMounted),
            "mounting" => Ok(Self::Mounting),
            "mounted" => Ok(Self::Mounted),
            "unmounting" => Ok(Self::Unmounting),
            "unloading" => Ok(Self::Unloading),
            "load_error" => Ok(Self::LoadError),
            "skip_because_broken" => Ok(Self::SkipBecauseBroken),
            _ => Err(format!("Invalid unit state: {s}")),
        }
    }
}

impl Default for UnitState {
    fn default() -> Self {
        Self::NotLoaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitional_states() {
        assert!(UnitState::LoadingSourceCode.is_transitional());
        assert!(UnitState::Bootstrapping.is_transitional());
        assert!(UnitState::Mounting.is_transitional());
        assert!(UnitState::Unmounting.is_transitional());
        assert!(UnitState::Unloading.is_transitional());
        assert!(!UnitState::Mounted.is_transitional());
        assert!(!UnitState::LoadError.is_transitional());
    }

    #[test]
    fn loaded_states() {
        assert!(!UnitState::NotLoaded.is_loaded());
        assert!(!UnitState::LoadError.is_loaded());
        assert!(UnitState::NotBootstrapped.is_loaded());
        assert!(UnitState::Mounted.is_loaded());
    }

    #[test]
    fn string_conversion_round_trips() {
        assert_eq!(UnitState::NotBootstrapped.to_string(), "not_bootstrapped");
        assert_eq!(
            "skip_because_broken".parse::<UnitState>().unwrap(),
            UnitState::SkipBecauseBroken
        );
        assert!("mounted ".parse::<UnitState>().is_err());
    }

    #[test]
    fn state_serde() {
        let json = serde_json::to_string(&UnitState::LoadingSourceCode).unwrap();
        assert_eq!(json, "\"loading_source_code\"");
        let parsed: UnitState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, UnitState::LoadingSourceCode);
    }
}
