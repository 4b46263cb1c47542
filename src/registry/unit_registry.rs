//! # Unit Registry
//!
//! Ordered collection of registered units. Storage and lookup only; no
//! transition logic lives here. Registration order is preserved so passes
//! evaluate units in the order hosts registered them.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use super::unit::Unit;
use crate::error::{ComposerError, Result};

/// Shared handle to a registered unit.
pub type SharedUnit = Arc<Mutex<Unit>>;

struct Entry {
    name: String,
    unit: SharedUnit,
}

/// Thread-safe ordered registry of units.
pub struct UnitRegistry {
    units: RwLock<Vec<Entry>>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self {
            units: RwLock::new(Vec::new()),
        }
    }

    /// Insert a new unit; fails if the name is already taken.
    pub async fn register(&self, unit: Unit) -> Result<SharedUnit> {
        let mut units = self.units.write().await;
        if units.iter().any(|e| e.name == unit.name) {
            return Err(ComposerError::DuplicateName {
                name: unit.name.clone(),
            });
        }
        let entry = Entry {
            name: unit.name.clone(),
            unit: Arc::new(Mutex::new(unit)),
        };
        let handle = Arc::clone(&entry.unit);
        units.push(entry);
        Ok(handle)
    }

    /// Remove a unit by name. Callers must have released it first.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let mut units = self.units.write().await;
        let position = units.iter().position(|e| e.name == name).ok_or_else(|| {
            ComposerError::UnitNotFound {
                name: name.to_string(),
            }
        })?;
        units.remove(position);
        Ok(())
    }

    pub async fn find(&self, name: &str) -> Option<SharedUnit> {
        let units = self.units.read().await;
        units
            .iter()
            .find(|e| e.name == name)
            .map(|e| Arc::clone(&e.unit))
    }

    pub async fn contains(&self, name: &str) -> bool {
        let units = self.units.read().await;
        units.iter().any(|e| e.name == name)
    }

    /// All units in registration order.
    pub async fn all(&self) -> Vec<SharedUnit> {
        let units = self.units.read().await;
        units.iter().map(|e| Arc::clone(&e.unit)).collect()
    }

    /// All names in registration order.
    pub async fn names(&self) -> Vec<String> {
        let units = self.units.read().await;
        units.iter().map(|e| e.name.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        self.units.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.units.read().await.is_empty()
    }
}

impl Default for UnitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::loader::{loader_fn, LoadUnitError};
    use crate::lifecycle::timeouts::PhaseTimeouts;
    use crate::registry::unit::UnitRegistration;
    use crate::routing::activity_fn;
    use crate::state_machine::UnitState;

    fn test_unit(name: &str) -> Unit {
        let loader = loader_fn(|_| async { Err(LoadUnitError::transient("unused")) });
        let registration = UnitRegistration::new(name, loader, activity_fn(|_| true));
        Unit::new(registration, PhaseTimeouts::default())
    }

    #[tokio::test]
    async fn register_preserves_order_and_initial_state() {
        let registry = UnitRegistry::new();
        registry.register(test_unit("a")).await.unwrap();
        registry.register(test_unit("b")).await.unwrap();
        assert_eq!(registry.names().await, vec!["a", "b"]);

        let unit = registry.find("a").await.unwrap();
        assert_eq!(unit.lock().await.state(), UnitState::NotLoaded);
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected_and_registry_unchanged() {
        let registry = UnitRegistry::new();
        registry.register(test_unit("a")).await.unwrap();
        let err = registry.register(test_unit("a")).await.unwrap_err();
        assert_eq!(
            err,
            ComposerError::DuplicateName {
                name: "a".to_string()
            }
        );
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn remove_unknown_name_fails() {
        let registry = UnitRegistry::new();
        let err = registry.remove("ghost").await.unwrap_err();
        assert_eq!(
            err,
            ComposerError::UnitNotFound {
                name: "ghost".to_string()
            }
        );
    }

    #[tokio::test]
    async fn remove_drops_the_entry() {
        let registry = UnitRegistry::new();
        registry.register(test_unit("a")).await.unwrap();
        registry.remove("a").await.unwrap();
        assert!(registry.is_empty().await);
        assert!(registry.find("a").await.is_none());
    }
}
