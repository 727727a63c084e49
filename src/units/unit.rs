//! Unit definition: the closed set of supported unit kinds

use super::{Service, Target, UnitSection};

/// A unit definition is either a Service or a Target, chosen by file suffix
#[derive(Debug, Clone, PartialEq)]
pub enum UnitDefinition {
    Service(Service),
    Target(Target),
}

impl UnitDefinition {
    pub fn name(&self) -> &str {
        match self {
            UnitDefinition::Service(s) => &s.name,
            UnitDefinition::Target(t) => &t.name,
        }
    }

    /// The [Unit] section with the dependency lists
    pub fn unit_section(&self) -> &UnitSection {
        match self {
            UnitDefinition::Service(s) => &s.unit,
            UnitDefinition::Target(t) => &t.unit,
        }
    }

    /// "service" or "target"
    pub fn unit_type(&self) -> &'static str {
        match self {
            UnitDefinition::Service(_) => "service",
            UnitDefinition::Target(_) => "target",
        }
    }

    pub fn as_service(&self) -> Option<&Service> {
        match self {
            UnitDefinition::Service(s) => Some(s),
            UnitDefinition::Target(_) => None,
        }
    }

    pub fn is_target(&self) -> bool {
        matches!(self, UnitDefinition::Target(_))
    }
}
