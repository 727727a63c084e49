//! Unit file parsing and type definitions
//!
//! Parses .service and .target files into typed Rust structures. This is the
//! definition provider for the manager: it only produces values, it never
//! holds runtime state.

mod parser;
mod service;
mod target;
mod unit;

pub use parser::{parse_bool, parse_environment, parse_file, parse_unit_file, ParseError, ParsedFile, ParsedSection};
pub use service::*;
pub use target::Target;
pub use unit::UnitDefinition;

use std::path::Path;

/// Append `.service` to names that carry no known unit suffix
pub fn normalize_name(name: &str) -> String {
    if name.ends_with(".service") || name.ends_with(".target") {
        name.to_string()
    } else {
        format!("{}.service", name)
    }
}

fn collect(section: &ParsedSection, key: &str) -> Vec<String> {
    section.get(key).cloned().unwrap_or_default()
}

fn first<'a>(section: &'a ParsedSection, key: &str) -> Option<&'a str> {
    section.get(key).and_then(|v| v.last()).map(String::as_str)
}

/// Convert the [Unit] section
fn parse_unit_section(parsed: &ParsedFile) -> UnitSection {
    let Some(unit) = parsed.get("[Unit]") else {
        return UnitSection::default();
    };

    UnitSection {
        description: first(unit, "DESCRIPTION").map(str::to_string),
        requires: collect(unit, "REQUIRES"),
        wants: collect(unit, "WANTS"),
        conflicts: collect(unit, "CONFLICTS"),
        after: collect(unit, "AFTER"),
        before: collect(unit, "BEFORE"),
    }
}

/// Convert parsed INI data into a typed Service
pub fn parse_service(name: &str, parsed: &ParsedFile) -> Result<Service, ParseError> {
    let mut svc = Service::new(name.to_string());
    svc.unit = parse_unit_section(parsed);

    let Some(section) = parsed.get("[Service]") else {
        return Ok(svc);
    };

    if let Some(t) = first(section, "TYPE") {
        svc.service.service_type = ServiceType::parse(t).unwrap_or_else(|| {
            log::warn!("{}: unsupported Type={}, using simple", name, t);
            ServiceType::Simple
        });
    }

    svc.service.exec_start = collect(section, "EXECSTART");
    svc.service.exec_stop = collect(section, "EXECSTOP");
    svc.service.exec_reload = collect(section, "EXECRELOAD");

    if let Some(s) = first(section, "REMAINAFTEREXIT") {
        svc.service.remain_after_exit = parse_bool(s);
    }
    if let Some(s) = first(section, "TIMEOUTSTARTSEC") {
        svc.service.timeout_start_sec = parse_duration(s).filter(|d| !d.is_zero());
    }
    if let Some(d) = first(section, "TIMEOUTSTOPSEC").and_then(parse_duration) {
        svc.service.timeout_stop_sec = d;
    }
    if let Some(dir) = first(section, "WORKINGDIRECTORY") {
        svc.service.working_directory = Some(dir.into());
    }
    for raw in section.get("ENVIRONMENT").into_iter().flatten() {
        svc.service.environment.extend(parse_environment(raw)?);
    }

    Ok(svc)
}

/// Convert parsed INI data into a typed Target
pub fn parse_target(name: &str, parsed: &ParsedFile) -> Result<Target, ParseError> {
    let mut target = Target::new(name.to_string());
    target.unit = parse_unit_section(parsed);
    Ok(target)
}

/// Parse unit content, selecting the kind from the name's suffix
pub fn parse_definition(name: &str, content: &str) -> Result<UnitDefinition, ParseError> {
    definition_from_parsed(name, &parse_file(content)?)
}

fn definition_from_parsed(name: &str, parsed: &ParsedFile) -> Result<UnitDefinition, ParseError> {
    if name.ends_with(".service") {
        Ok(UnitDefinition::Service(parse_service(name, parsed)?))
    } else if name.ends_with(".target") {
        Ok(UnitDefinition::Target(parse_target(name, parsed)?))
    } else {
        Err(ParseError::UnknownType(name.to_string()))
    }
}

/// Load a unit file (service or target) from disk
pub async fn load_unit(path: &Path) -> Result<UnitDefinition, ParseError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ParseError::UnknownType(path.display().to_string()))?;

    if !(name.ends_with(".service") || name.ends_with(".target")) {
        return Err(ParseError::UnknownType(name.to_string()));
    }

    let parsed = parse_unit_file(path).await?;
    definition_from_parsed(name, &parsed)
}

/// Load every .service/.target file in a directory
///
/// Files that fail to parse are logged and skipped. A missing directory yields
/// an empty list.
pub async fn load_directory(dir: &Path) -> Result<Vec<UnitDefinition>, ParseError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("service") | Some("target")
        ) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut units = Vec::with_capacity(paths.len());
    for path in paths {
        match load_unit(&path).await {
            Ok(unit) => units.push(unit),
            Err(e) => log::warn!("Skipping {}: {}", path.display(), e),
        }
    }

    Ok(units)
}
