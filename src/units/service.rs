//! Typed service definitions matching .service files

use std::path::PathBuf;
use std::time::Duration;

/// Service type determines when a start counts as complete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ServiceType {
    #[default]
    Simple, // Active as soon as the main process is spawned
    Oneshot, // Start completes when ExecStart exits
}

impl ServiceType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "simple" | "exec" => Some(Self::Simple),
            "oneshot" => Some(Self::Oneshot),
            _ => None,
        }
    }
}

/// [Unit] section: the dependency-relevant part of every unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitSection {
    pub description: Option<String>,
    pub requires: Vec<String>,
    pub wants: Vec<String>,
    pub conflicts: Vec<String>,
    pub after: Vec<String>,
    pub before: Vec<String>,
}

/// [Service] section
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSection {
    pub service_type: ServiceType,

    pub exec_start: Vec<String>,
    pub exec_stop: Vec<String>,
    pub exec_reload: Vec<String>,

    pub remain_after_exit: bool,
    pub timeout_start_sec: Option<Duration>,
    pub timeout_stop_sec: Duration,

    pub working_directory: Option<PathBuf>,
    pub environment: Vec<(String, String)>,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            service_type: ServiceType::default(),
            exec_start: Vec::new(),
            exec_stop: Vec::new(),
            exec_reload: Vec::new(),
            remain_after_exit: false,
            timeout_start_sec: None,
            timeout_stop_sec: Duration::from_secs(10),
            working_directory: None,
            environment: Vec::new(),
        }
    }
}

/// A parsed .service unit
#[derive(Debug, Clone, PartialEq)]
pub struct Service {
    pub name: String,
    pub unit: UnitSection,
    pub service: ServiceSection,
}

impl Service {
    pub fn new(name: String) -> Self {
        Self {
            name,
            unit: UnitSection::default(),
            service: ServiceSection::default(),
        }
    }
}

/// Parse a time span ("5s", "100ms", "2min", "1h", bare seconds)
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();

    if let Some(n) = s.strip_suffix("ms") {
        n.parse().ok().map(Duration::from_millis)
    } else if let Some(n) = s.strip_suffix("min") {
        n.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(n) = s.strip_suffix('s') {
        n.parse().ok().map(Duration::from_secs)
    } else if let Some(n) = s.strip_suffix('h') {
        n.parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("2min"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn test_service_type_parse() {
        assert_eq!(ServiceType::parse("oneshot"), Some(ServiceType::Oneshot));
        assert_eq!(ServiceType::parse("Simple"), Some(ServiceType::Simple));
        assert_eq!(ServiceType::parse("forking"), None);
    }
}
