//! Supervisable behavior of a unit
//!
//! The engine never decides what "start" means for a unit; it calls into the
//! unit's behavior and only looks at success/failure and the activation state.

use parking_lot::{Mutex, RwLock};
use tokio::process::Child;

use super::process::{self, SpawnError};
use super::state::ActiveState;
use super::ManagerError;
use crate::units::{Service, ServiceType, UnitDefinition};

/// Closed set of unit behaviors, selected by unit-file suffix at load time
#[derive(Debug)]
pub enum Behavior {
    Service(ServiceBehavior),
    Target(TargetBehavior),
}

impl Behavior {
    pub fn from_definition(def: &UnitDefinition) -> Self {
        match def {
            UnitDefinition::Service(svc) => Behavior::Service(ServiceBehavior::new(svc.clone())),
            UnitDefinition::Target(t) => Behavior::Target(TargetBehavior::new(&t.name)),
        }
    }

    /// Pick up a changed definition of the same kind. Returns false on a kind mismatch.
    pub fn refresh(&self, def: &UnitDefinition) -> bool {
        match (self, def) {
            (Behavior::Service(b), UnitDefinition::Service(svc)) => {
                *b.config.write() = svc.clone();
                true
            }
            (Behavior::Target(_), UnitDefinition::Target(_)) => true,
            _ => false,
        }
    }

    pub async fn start(&self) -> Result<(), ManagerError> {
        match self {
            Behavior::Service(b) => b.start().await,
            Behavior::Target(b) => b.start(),
        }
    }

    pub async fn stop(&self) -> Result<(), ManagerError> {
        match self {
            Behavior::Service(b) => b.stop().await,
            Behavior::Target(b) => b.stop(),
        }
    }

    pub async fn reload(&self) -> Result<(), ManagerError> {
        match self {
            Behavior::Service(b) => b.reload().await,
            Behavior::Target(b) => Err(ManagerError::Unsupported {
                unit: b.name.clone(),
                action: "reload",
            }),
        }
    }

    pub fn activation_state(&self) -> ActiveState {
        match self {
            Behavior::Service(b) => b.activation_state(),
            Behavior::Target(b) => *b.state.lock(),
        }
    }

    /// Main PID of a running service
    pub fn main_pid(&self) -> Option<u32> {
        match self {
            Behavior::Service(b) => b.runtime.lock().main_pid,
            Behavior::Target(_) => None,
        }
    }
}

/// Targets have no process: reaching them is a pure state change
#[derive(Debug)]
pub struct TargetBehavior {
    name: String,
    state: Mutex<ActiveState>,
}

impl TargetBehavior {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(ActiveState::Inactive),
        }
    }

    fn start(&self) -> Result<(), ManagerError> {
        *self.state.lock() = ActiveState::Active;
        log::debug!("Target {} reached", self.name);
        Ok(())
    }

    fn stop(&self) -> Result<(), ManagerError> {
        *self.state.lock() = ActiveState::Inactive;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ServiceRuntime {
    state: ActiveState,
    child: Option<Child>,
    main_pid: Option<u32>,
}

/// A service backed by an OS process
#[derive(Debug)]
pub struct ServiceBehavior {
    config: RwLock<Service>,
    runtime: Mutex<ServiceRuntime>,
}

impl ServiceBehavior {
    fn new(service: Service) -> Self {
        Self {
            config: RwLock::new(service),
            runtime: Mutex::new(ServiceRuntime::default()),
        }
    }

    fn set_state(&self, state: ActiveState) {
        self.runtime.lock().state = state;
    }

    fn fail(&self, name: &str, err: SpawnError) -> ManagerError {
        log::warn!("{} failed: {}", name, err);
        let mut rt = self.runtime.lock();
        rt.state = ActiveState::Failed;
        rt.main_pid = None;
        ManagerError::Spawn(err)
    }

    fn mainpid_env(&self) -> Vec<(&'static str, String)> {
        self.runtime
            .lock()
            .main_pid
            .map(|pid| vec![("MAINPID", pid.to_string())])
            .unwrap_or_default()
    }

    async fn start(&self) -> Result<(), ManagerError> {
        let svc = self.config.read().clone();
        let name = svc.name.as_str();

        if svc.service.exec_start.is_empty() {
            return Err(self.fail(name, SpawnError::NoExecStart(name.to_string())));
        }
        self.set_state(ActiveState::Activating);

        match svc.service.service_type {
            ServiceType::Simple => {
                let child = process::spawn_command(&svc, &svc.service.exec_start[0], &[])
                    .map_err(|e| self.fail(name, e))?;
                let pid = child.id();
                log::info!("Started {} (PID {:?})", name, pid);

                let mut rt = self.runtime.lock();
                rt.state = ActiveState::Active;
                rt.main_pid = pid;
                rt.child = Some(child);
            }
            ServiceType::Oneshot => {
                for line in &svc.service.exec_start {
                    self.run_oneshot_step(&svc, line)
                        .await
                        .map_err(|e| self.fail(name, e))?;
                }
                let state = if svc.service.remain_after_exit {
                    ActiveState::Active
                } else {
                    ActiveState::Inactive
                };
                log::info!("{} finished, now {}", name, state);
                self.set_state(state);
            }
        }

        Ok(())
    }

    async fn run_oneshot_step(&self, svc: &Service, line: &str) -> Result<(), SpawnError> {
        let mut child = process::spawn_command(svc, line, &[])?;

        let status = match svc.service.timeout_start_sec {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    if let Err(e) = child.kill().await {
                        log::warn!("Failed to kill {}: {}", svc.name, e);
                    }
                    return Err(SpawnError::Timeout(limit));
                }
            },
            None => child.wait().await,
        }
        .map_err(|e| SpawnError::Spawn(e.to_string()))?;

        process::check_status(line, status)
    }

    async fn stop(&self) -> Result<(), ManagerError> {
        let svc = self.config.read().clone();
        let env = self.mainpid_env();

        let child = {
            let mut rt = self.runtime.lock();
            rt.state = ActiveState::Deactivating;
            rt.child.take()
        };

        for line in &svc.service.exec_stop {
            if let Err(e) = process::run_command(&svc, line, &env).await {
                log::warn!("{}: ExecStop failed: {}", svc.name, e);
            }
        }

        if let Some(child) = child {
            let code = process::terminate(&svc.name, child, svc.service.timeout_stop_sec).await;
            log::info!("Stopped {} (exit code {:?})", svc.name, code);
        }

        let mut rt = self.runtime.lock();
        rt.state = ActiveState::Inactive;
        rt.main_pid = None;
        Ok(())
    }

    async fn reload(&self) -> Result<(), ManagerError> {
        let svc = self.config.read().clone();

        if svc.service.exec_reload.is_empty() {
            return Err(ManagerError::Unsupported {
                unit: svc.name.clone(),
                action: "reload",
            });
        }
        if !self.activation_state().is_active() {
            return Err(ManagerError::NotActive(svc.name.clone()));
        }

        let env = self.mainpid_env();
        self.set_state(ActiveState::Reloading);

        let mut result = Ok(());
        for line in &svc.service.exec_reload {
            if let Err(e) = process::run_command(&svc, line, &env).await {
                log::warn!("{}: ExecReload failed: {}", svc.name, e);
                result = Err(ManagerError::Spawn(e));
                break;
            }
        }

        // A failed reload leaves the service running on its old configuration
        self.set_state(ActiveState::Active);
        result
    }

    /// Current state, reaping the main process if it has exited
    fn activation_state(&self) -> ActiveState {
        let mut rt = self.runtime.lock();

        let exited = match rt.child.as_mut().map(|c| c.try_wait()) {
            Some(Ok(Some(status))) => Some(status),
            Some(Ok(None)) | None => None,
            Some(Err(e)) => {
                log::debug!("try_wait failed: {}", e);
                None
            }
        };

        if let Some(status) = exited {
            let name = self.config.read().name.clone();
            rt.child = None;
            rt.main_pid = None;
            rt.state = if status.success() {
                log::info!("{} exited", name);
                ActiveState::Inactive
            } else {
                log::warn!("{} exited with {}", name, status);
                ActiveState::Failed
            };
        }

        rt.state
    }
}
