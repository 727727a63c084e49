//! IPC protocol for unitd daemon communication
//!
//! Defines request/response types for CLI ↔ daemon communication.

use serde::{Deserialize, Serialize};

use crate::manager::{JobReport, JobType, PlannedJob};

pub const SOCKET_PATH: &str = "/run/unitd.sock";

/// Request from CLI to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// Start units and everything they require
    Start { names: Vec<String> },
    /// Stop units
    Stop { names: Vec<String> },
    /// Restart units
    Restart { names: Vec<String> },
    /// Reload units in place
    Reload { names: Vec<String> },
    /// Build a transaction without running it
    Plan { job_type: JobType, names: Vec<String> },
    /// Get unit status
    Status { name: String },
    /// List all known units
    List,
    /// Reload unit files from disk
    ReloadUnitFiles,
    /// Ping (health check)
    Ping,
}

/// Unit info returned by list/status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitInfo {
    pub name: String,
    pub unit_type: String,
    pub state: String,
    pub description: Option<String>,
    pub main_pid: Option<u32>,
    /// Type of the job in flight, if any
    pub job: Option<JobType>,
}

/// Response from daemon to CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    /// Success with no data
    Ok,
    /// Per-unit results of a transaction
    Jobs(Vec<JobReport>),
    /// Ordered dry-run result
    Plan(Vec<PlannedJob>),
    /// Single unit status
    Status(UnitInfo),
    /// List of units
    Units(Vec<UnitInfo>),
    /// Number of unit files loaded
    Loaded(usize),
    /// Error with message
    Error(String),
    /// Pong (response to ping)
    Pong,
}
