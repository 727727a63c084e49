//! Service manager
//!
//! Loads unit definitions and turns start/stop/restart/reload requests into
//! transactions over the dependency closure of the named units.

mod behavior;
mod graph;
mod job;
mod process;
mod registry;
mod signal;
mod state;
mod transaction;

pub use behavior::Behavior;
pub use graph::{CycleError, OrderGraph};
pub use job::{Edge, Job, JobArena, JobId, JobOutcome, JobReport, JobStatus, JobType};
pub use process::SpawnError;
pub use registry::{ActiveJob, Registry, Unit};
pub use signal::ReadinessSignal;
pub use state::ActiveState;
pub use transaction::{Dispatch, PlannedJob, Relation, Transaction};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

use crate::protocol::UnitInfo;
use crate::units::{self, UnitDefinition};

/// Default unit search paths, earlier entries winning
pub fn default_unit_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/etc/unitd/system"),
        PathBuf::from("/usr/lib/unitd/system"),
    ]
}

/// Service manager: owns the unit registry and runs transactions against it
///
/// The registry lock is held while a transaction is built, merged, ordered and
/// its units are claimed. It is released before any job runs, so long-running
/// jobs never block other requests.
#[derive(Debug)]
pub struct Manager {
    registry: RwLock<Registry>,
    next_transaction: AtomicU64,
}

impl Manager {
    /// Create a manager over the default search paths
    pub fn new() -> Self {
        Self::with_paths(default_unit_paths())
    }

    pub fn with_paths(unit_paths: Vec<PathBuf>) -> Self {
        Self {
            registry: RwLock::new(Registry::new(unit_paths)),
            next_transaction: AtomicU64::new(1),
        }
    }

    /// (Re)load unit files from the search paths
    pub async fn load_units(&self) -> Result<usize, ManagerError> {
        self.registry.write().await.load().await
    }

    /// Load a unit from a specific path, outside the search paths
    pub async fn load_from_path(&self, path: &Path) -> Result<String, ManagerError> {
        let def = units::load_unit(path)
            .await
            .map_err(|e| ManagerError::Parse(format!("{}: {}", path.display(), e)))?;
        let name = def.name().to_string();
        self.insert(def).await;
        Ok(name)
    }

    /// Register a definition that did not come from disk
    pub async fn insert(&self, def: UnitDefinition) {
        self.registry.write().await.insert(def);
    }

    pub async fn start(&self, names: &[String]) -> Result<Vec<JobReport>, ManagerError> {
        self.run(JobType::Start, names).await
    }

    pub async fn stop(&self, names: &[String]) -> Result<Vec<JobReport>, ManagerError> {
        self.run(JobType::Stop, names).await
    }

    pub async fn restart(&self, names: &[String]) -> Result<Vec<JobReport>, ManagerError> {
        self.run(JobType::Restart, names).await
    }

    pub async fn reload(&self, names: &[String]) -> Result<Vec<JobReport>, ManagerError> {
        self.run(JobType::Reload, names).await
    }

    /// Run one transaction of `job_type` over `names`
    pub async fn run(
        &self,
        job_type: JobType,
        names: &[String],
    ) -> Result<Vec<JobReport>, ManagerError> {
        let dispatch = {
            let mut registry = self.registry.write().await;
            self.build(&mut registry, job_type, names)?.prepare()?
        };
        Ok(dispatch.execute().await)
    }

    /// Build, merge and order a transaction without running it
    pub async fn plan(
        &self,
        job_type: JobType,
        names: &[String],
    ) -> Result<Vec<PlannedJob>, ManagerError> {
        let mut registry = self.registry.write().await;
        self.build(&mut registry, job_type, names)?.plan()
    }

    fn build(
        &self,
        registry: &mut Registry,
        job_type: JobType,
        names: &[String],
    ) -> Result<Transaction, ManagerError> {
        let id = self.next_transaction.fetch_add(1, Ordering::Relaxed);
        log::info!("tx {}: {} {}", id, job_type, names.join(" "));

        let mut tx = Transaction::new(id);
        for name in names {
            tx.add(registry, job_type, name, None, true)?;
        }
        Ok(tx)
    }

    /// Status of one unit, loaded or merely known
    pub async fn status(&self, name: &str) -> Result<UnitInfo, ManagerError> {
        let registry = self.registry.read().await;

        if let Some(unit) = registry.lookup(name) {
            return Ok(unit_info(&unit));
        }
        registry
            .definition(name)
            .map(definition_info)
            .ok_or_else(|| ManagerError::NotFound(units::normalize_name(name)))
    }

    /// Every known unit, sorted by name
    pub async fn list(&self) -> Vec<UnitInfo> {
        let registry = self.registry.read().await;
        registry
            .definitions()
            .map(|def| match registry.lookup(def.name()) {
                Some(unit) => unit_info(&unit),
                None => definition_info(def),
            })
            .collect()
    }

    /// Poll every unit so exited main processes are noticed
    pub async fn reap(&self) {
        let registry = self.registry.read().await;
        for unit in registry.units() {
            unit.activation_state();
        }
    }

    /// Stop everything that is up
    ///
    /// Units with a job in flight are waited for and picked up in the next
    /// round, so one busy unit does not leave the others running.
    pub async fn stop_all(&self) -> Result<Vec<JobReport>, ManagerError> {
        let mut reports = Vec::new();
        loop {
            let (active, in_flight) = {
                let registry = self.registry.read().await;
                let mut active = Vec::new();
                let mut in_flight = Vec::new();
                for unit in registry.units() {
                    if let Some(rx) = unit.wait_for_current_job() {
                        in_flight.push(rx);
                    } else if unit.activation_state().is_active() {
                        active.push(unit.name().to_string());
                    }
                }
                (active, in_flight)
            };

            let mut retry = !in_flight.is_empty();
            if !active.is_empty() {
                log::info!("Stopping {} active units", active.len());
                match self.stop(&active).await {
                    Ok(done) => reports.extend(done),
                    Err(ManagerError::Busy(name)) => {
                        log::debug!("{} picked up a job, retrying", name);
                        retry = true;
                    }
                    Err(e) => return Err(e),
                }
            }
            if !retry {
                return Ok(reports);
            }

            log::info!("Waiting for {} jobs in flight", in_flight.len());
            for rx in in_flight {
                // A dropped sender also means the job is over
                let _ = rx.await;
            }
        }
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

fn unit_info(unit: &Unit) -> UnitInfo {
    UnitInfo {
        name: unit.name().to_string(),
        unit_type: unit.unit_type().to_string(),
        state: unit.activation_state().to_string(),
        description: unit.description(),
        main_pid: unit.behavior().main_pid(),
        job: unit.current_job().map(|j| j.job_type),
    }
}

fn definition_info(def: &UnitDefinition) -> UnitInfo {
    UnitInfo {
        name: def.name().to_string(),
        unit_type: def.unit_type().to_string(),
        state: ActiveState::Inactive.to_string(),
        description: def.unit_section().description.clone(),
        main_pid: None,
        job: None,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Unit not found: {0}")]
    NotFound(String),

    #[error("Failed to parse unit: {0}")]
    Parse(String),

    #[error("Unit not active: {0}")]
    NotActive(String),

    #[error("Failed to spawn: {0}")]
    Spawn(#[from] SpawnError),

    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("Conflicting jobs on {unit}: {existing} and {incoming}")]
    Conflict {
        unit: String,
        existing: JobType,
        incoming: JobType,
    },

    #[error("Requested job for {unit} was dropped while resolving conflicts")]
    Dropped { unit: String },

    #[error("Unit has a job in progress: {0}")]
    Busy(String),

    #[error("{unit} does not support {action}")]
    Unsupported { unit: String, action: &'static str },

    #[error("I/O error: {0}")]
    Io(String),
}
