//! Target unit definitions
//!
//! Targets are synchronization points that group services together.
//! They only carry a [Unit] section.

use super::service::UnitSection;

/// A parsed .target unit
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub name: String,
    pub unit: UnitSection,
}

impl Target {
    pub fn new(name: String) -> Self {
        Self {
            name,
            unit: UnitSection::default(),
        }
    }
}
