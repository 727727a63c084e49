//! INI-style unit file parser
//!
//! Produces a map of `[Section]` -> upper-cased key -> values in declaration order.

use std::collections::HashMap;
use std::path::Path;

/// Values of one section, keyed by upper-cased directive name
pub type ParsedSection = HashMap<String, Vec<String>>;

/// A parsed unit file: section header (with brackets) -> directives
pub type ParsedFile = HashMap<String, ParsedSection>;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Section '{0}' appears more than once")]
    DuplicateSection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown unit type: {0}")]
    UnknownType(String),

    #[error("Parse error: {0}")]
    Generic(String),
}

/// Directives whose value is a whitespace-separated list of unit names
const LIST_KEYS: &[&str] = &["AFTER", "BEFORE", "REQUIRES", "WANTS", "CONFLICTS"];

/// Parse unit file content
pub fn parse_file(content: &str) -> Result<ParsedFile, ParseError> {
    let mut sections = ParsedFile::new();
    let mut current: Option<(String, ParsedSection)> = None;

    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if line.starts_with('[') {
            if let Some((name, section)) = current.take() {
                insert_section(&mut sections, name, section)?;
            }
            current = Some((line.to_string(), ParsedSection::new()));
            continue;
        }

        // Directives outside any section are ignored
        let Some((_, section)) = current.as_mut() else {
            continue;
        };
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };

        let key = key.trim().to_uppercase();
        let value = value.trim();
        let entry = section.entry(key.clone()).or_default();

        if LIST_KEYS.contains(&key.as_str()) {
            entry.extend(value.split_whitespace().map(str::to_string));
        } else if !value.is_empty() {
            entry.push(value.to_string());
        }
    }

    if let Some((name, section)) = current {
        insert_section(&mut sections, name, section)?;
    }

    Ok(sections)
}

fn insert_section(
    sections: &mut ParsedFile,
    name: String,
    section: ParsedSection,
) -> Result<(), ParseError> {
    if sections.contains_key(&name) {
        return Err(ParseError::DuplicateSection(name));
    }
    sections.insert(name, section);
    Ok(())
}

/// Read and parse a unit file from disk
pub async fn parse_unit_file(path: &Path) -> Result<ParsedFile, ParseError> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_file(&content)
}

/// Parse an Environment= value using shell-like quoting
pub fn parse_environment(raw: &str) -> Result<Vec<(String, String)>, ParseError> {
    let parts = shlex::split(raw)
        .ok_or_else(|| ParseError::Generic(format!("Invalid shell quoting in: {}", raw)))?;

    Ok(parts
        .into_iter()
        .filter_map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect())
}

/// systemd-style boolean
pub fn parse_bool(s: &str) -> bool {
    matches!(s.to_lowercase().as_str(), "yes" | "true" | "1" | "on")
}
