//! Unit registry
//!
//! Keeps the catalog of known unit definitions and the runtime `Unit` record
//! of every unit referenced so far. Records are created lazily on first lookup
//! and live for the rest of the process.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;

use super::behavior::Behavior;
use super::job::JobType;
use super::signal::ReadinessSignal;
use super::state::ActiveState;
use super::ManagerError;
use crate::units::{self, UnitDefinition, UnitSection};

/// Job currently attached to a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveJob {
    pub transaction: u64,
    pub job_type: JobType,
}

/// Runtime record of a unit
#[derive(Debug)]
pub struct Unit {
    name: String,
    unit_type: &'static str,
    section: RwLock<UnitSection>,
    behavior: Behavior,
    current_job: Mutex<Option<ActiveJob>>,
    signal: ReadinessSignal,
}

impl Unit {
    pub fn new(def: &UnitDefinition) -> Self {
        Self {
            name: def.name().to_string(),
            unit_type: def.unit_type(),
            section: RwLock::new(def.unit_section().clone()),
            behavior: Behavior::from_definition(def),
            current_job: Mutex::new(None),
            signal: ReadinessSignal::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit_type(&self) -> &'static str {
        self.unit_type
    }

    /// Snapshot of the declared dependency lists
    pub fn dependencies(&self) -> UnitSection {
        self.section.read().clone()
    }

    pub fn description(&self) -> Option<String> {
        self.section.read().description.clone()
    }

    pub fn behavior(&self) -> &Behavior {
        &self.behavior
    }

    pub fn activation_state(&self) -> ActiveState {
        self.behavior.activation_state()
    }

    pub fn signal(&self) -> &ReadinessSignal {
        &self.signal
    }

    pub fn current_job(&self) -> Option<ActiveJob> {
        *self.current_job.lock()
    }

    /// Attach a job unless another one is still in flight
    pub fn try_attach_job(&self, job: ActiveJob) -> bool {
        let mut current = self.current_job.lock();
        if current.is_some() {
            return false;
        }
        *current = Some(job);
        true
    }

    pub fn detach_job(&self) {
        self.current_job.lock().take();
    }

    /// Waiter for the job in flight on this unit, if there is one
    ///
    /// Checked and registered under the job slot lock. A finishing job detaches
    /// before it notifies, so the waiter cannot miss that completion.
    pub fn wait_for_current_job(&self) -> Option<oneshot::Receiver<()>> {
        let current = self.current_job.lock();
        current.map(|_| self.signal.wait_for())
    }

    fn refresh(&self, def: &UnitDefinition) {
        *self.section.write() = def.unit_section().clone();
        if !self.behavior.refresh(def) {
            log::warn!("{}: unit kind changed, keeping the old behavior", self.name);
        }
    }
}

/// Name -> definition catalog plus name -> runtime unit map
#[derive(Debug, Default)]
pub struct Registry {
    unit_paths: Vec<PathBuf>,
    catalog: BTreeMap<String, UnitDefinition>,
    units: HashMap<String, Arc<Unit>>,
}

impl Registry {
    /// Registry that loads from the given search paths, earlier paths winning
    pub fn new(unit_paths: Vec<PathBuf>) -> Self {
        Self {
            unit_paths,
            ..Self::default()
        }
    }

    pub fn unit_paths(&self) -> &[PathBuf] {
        &self.unit_paths
    }

    /// Add or replace one definition
    pub fn insert(&mut self, def: UnitDefinition) {
        if let Some(unit) = self.units.get(def.name()) {
            unit.refresh(&def);
        }
        self.catalog.insert(def.name().to_string(), def);
    }

    /// (Re)scan the search paths. Returns the number of definitions loaded.
    pub async fn load(&mut self) -> Result<usize, ManagerError> {
        let mut found: BTreeMap<String, UnitDefinition> = BTreeMap::new();

        for dir in &self.unit_paths {
            let defs = units::load_directory(dir)
                .await
                .map_err(|e| ManagerError::Io(format!("{}: {}", dir.display(), e)))?;
            for def in defs {
                found.entry(def.name().to_string()).or_insert(def);
            }
        }

        let count = found.len();
        for def in found.into_values() {
            self.insert(def);
        }
        log::info!("Loaded {} unit definitions", count);
        Ok(count)
    }

    /// Runtime record for `name`, created from its definition on first use
    pub fn get(&mut self, name: &str) -> Result<Arc<Unit>, ManagerError> {
        let name = units::normalize_name(name);

        if let Some(unit) = self.units.get(&name) {
            return Ok(Arc::clone(unit));
        }

        let def = self
            .catalog
            .get(&name)
            .ok_or_else(|| ManagerError::NotFound(name.clone()))?;
        let unit = Arc::new(Unit::new(def));
        log::debug!("Materialized {} ({})", name, unit.unit_type());
        self.units.insert(name, Arc::clone(&unit));
        Ok(unit)
    }

    /// Already materialized unit, without creating one
    pub fn lookup(&self, name: &str) -> Option<Arc<Unit>> {
        self.units.get(&units::normalize_name(name)).cloned()
    }

    pub fn definition(&self, name: &str) -> Option<&UnitDefinition> {
        self.catalog.get(&units::normalize_name(name))
    }

    pub fn definitions(&self) -> impl Iterator<Item = &UnitDefinition> {
        self.catalog.values()
    }

    pub fn units(&self) -> impl Iterator<Item = &Arc<Unit>> {
        self.units.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::parse_definition;

    fn registry_with(defs: &[(&str, &str)]) -> Registry {
        let mut reg = Registry::default();
        for (name, content) in defs {
            reg.insert(parse_definition(name, content).unwrap());
        }
        reg
    }

    #[test]
    fn test_get_materializes_once() {
        let mut reg = registry_with(&[("a.service", "[Service]\nExecStart=/bin/true\n")]);
        assert!(reg.lookup("a.service").is_none());

        let first = reg.get("a").unwrap();
        let second = reg.get("a.service").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.unit_type(), "service");
        assert_eq!(first.activation_state(), ActiveState::Inactive);
    }

    #[test]
    fn test_get_not_found() {
        let mut reg = Registry::default();
        assert!(matches!(
            reg.get("ghost.service"),
            Err(ManagerError::NotFound(name)) if name == "ghost.service"
        ));
    }

    #[test]
    fn test_insert_refreshes_materialized_unit() {
        let mut reg = registry_with(&[("a.target", "[Unit]\nWants=b.service\n")]);
        let unit = reg.get("a.target").unwrap();
        assert_eq!(unit.dependencies().wants, vec!["b.service"]);

        reg.insert(parse_definition("a.target", "[Unit]\nRequires=c.service\n").unwrap());
        assert!(unit.dependencies().wants.is_empty());
        assert_eq!(unit.dependencies().requires, vec!["c.service"]);
    }

    #[test]
    fn test_single_job_attachment() {
        let mut reg = registry_with(&[("a.target", "")]);
        let unit = reg.get("a.target").unwrap();
        let job = ActiveJob {
            transaction: 1,
            job_type: JobType::Start,
        };

        assert!(unit.try_attach_job(job));
        assert!(!unit.try_attach_job(ActiveJob { transaction: 2, ..job }));
        assert_eq!(unit.current_job(), Some(job));

        unit.detach_job();
        assert!(unit.current_job().is_none());
    }

    #[tokio::test]
    async fn test_wait_for_current_job() {
        let mut reg = registry_with(&[("a.target", "")]);
        let unit = reg.get("a.target").unwrap();
        assert!(unit.wait_for_current_job().is_none());

        assert!(unit.try_attach_job(ActiveJob {
            transaction: 1,
            job_type: JobType::Reload,
        }));
        let waiter = unit.wait_for_current_job().unwrap();
        assert_eq!(unit.signal().pending(), 1);

        unit.detach_job();
        unit.signal().notify_ready();
        assert!(waiter.await.is_ok());
    }
}
