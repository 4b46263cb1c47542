// Unit storage and lookup

pub mod unit;
pub mod unit_registry;

pub use unit::{Unit, UnitRegistration};
pub use unit_registry::{SharedUnit, UnitRegistry};
