//! Jobs: pending state changes on a single unit within one transaction
//!
//! Jobs live in a [`JobArena`] and refer to each other through [`JobId`]
//! handles, so the requires/wants/conflicts/after graph can be cyclic without
//! any ownership trouble.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::registry::Unit;
use super::state::ActiveState;
use super::ManagerError;

/// Action a job performs on its unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JobType {
    Start,
    Stop,
    Restart,
    Reload,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Reload => "reload",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            "restart" => Some(Self::Restart),
            "reload" => Some(Self::Reload),
            _ => None,
        }
    }

    /// Merge table: the job type that satisfies both, or None if they conflict
    ///
    /// | existing \ incoming | start   | stop | restart | reload  |
    /// |---------------------|---------|------|---------|---------|
    /// | start               | start   | -    | restart | restart |
    /// | stop                | -       | stop | -       | -       |
    /// | restart             | restart | -    | restart | restart |
    /// | reload              | restart | -    | restart | reload  |
    pub fn merge(self, other: JobType) -> Option<JobType> {
        use JobType::*;
        match (self, other) {
            (a, b) if a == b => Some(a),
            (Stop, _) | (_, Stop) => None,
            _ => Some(Restart),
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// `waiting -> running -> {success, failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Waiting,
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

/// Stable handle of a job inside its transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(usize);

/// Directed relation between two jobs, seen from the first one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Requires,
    RequiredBy,
    Wants,
    WantedBy,
    Conflicts,
    ConflictedBy,
    After,
    Before,
}

impl Edge {
    pub const ALL: [Edge; 8] = [
        Edge::Requires,
        Edge::RequiredBy,
        Edge::Wants,
        Edge::WantedBy,
        Edge::Conflicts,
        Edge::ConflictedBy,
        Edge::After,
        Edge::Before,
    ];

    pub fn inverse(self) -> Edge {
        match self {
            Edge::Requires => Edge::RequiredBy,
            Edge::RequiredBy => Edge::Requires,
            Edge::Wants => Edge::WantedBy,
            Edge::WantedBy => Edge::Wants,
            Edge::Conflicts => Edge::ConflictedBy,
            Edge::ConflictedBy => Edge::Conflicts,
            Edge::After => Edge::Before,
            Edge::Before => Edge::After,
        }
    }
}

/// A pending action on one unit
#[derive(Debug)]
pub struct Job {
    id: JobId,
    job_type: JobType,
    status: JobStatus,
    unit: Arc<Unit>,
    anchored: bool,
    requested: bool,
    edges: [BTreeSet<JobId>; 8],
}

impl Job {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn unit(&self) -> &Arc<Unit> {
        &self.unit
    }

    /// Required by the request itself or by a hard dependency chain
    pub fn is_anchored(&self) -> bool {
        self.anchored
    }

    /// Named directly by the caller
    pub fn is_requested(&self) -> bool {
        self.requested
    }

    pub fn edges(&self, edge: Edge) -> &BTreeSet<JobId> {
        &self.edges[edge as usize]
    }

    fn edges_mut(&mut self, edge: Edge) -> &mut BTreeSet<JobId> {
        &mut self.edges[edge as usize]
    }

    /// Nothing still needs this job: no hard dependent and no conflicting job
    ///
    /// Jobs the caller asked for are never orphans.
    pub fn is_orphan(&self) -> bool {
        !self.requested
            && self.edges(Edge::RequiredBy).is_empty()
            && self.edges(Edge::ConflictedBy).is_empty()
    }

    /// The unit is already where this job would take it
    pub fn is_redundant(&self) -> bool {
        let state = self.unit.activation_state();
        match self.job_type {
            JobType::Start => matches!(state, ActiveState::Active | ActiveState::Reloading),
            JobType::Stop => state.is_inactive_or_failed(),
            JobType::Restart | JobType::Reload => false,
        }
    }

    /// Perform the action and publish completion on the unit's readiness signal
    pub async fn run(&mut self) -> Result<(), ManagerError> {
        let _completion = Completion(&self.unit);
        self.status = JobStatus::Running;
        log::debug!("{}/{} running", self.unit.name(), self.job_type);

        let behavior = self.unit.behavior();
        let result = match self.job_type {
            JobType::Start => behavior.start().await,
            JobType::Stop => behavior.stop().await,
            JobType::Restart => match behavior.stop().await {
                Ok(()) => behavior.start().await,
                Err(e) => Err(e),
            },
            JobType::Reload => behavior.reload().await,
        };

        self.status = if result.is_ok() {
            JobStatus::Success
        } else {
            JobStatus::Failed
        };
        log::info!(
            "{}/{} finished: {:?}",
            self.unit.name(),
            self.job_type,
            self.status
        );
        result
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.unit.name(), self.job_type)
    }
}

/// Releases the unit and wakes its waiters even if the job future is dropped
struct Completion<'a>(&'a Arc<Unit>);

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        self.0.detach_job();
        self.0.signal().notify_ready();
    }
}

/// Storage for the jobs of one transaction
#[derive(Debug, Default)]
pub struct JobArena {
    slots: Vec<Option<Job>>,
}

impl JobArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, job_type: JobType, unit: Arc<Unit>, anchored: bool) -> JobId {
        let id = JobId(self.slots.len());
        self.slots.push(Some(Job {
            id,
            job_type,
            status: JobStatus::Waiting,
            unit,
            anchored,
            requested: false,
            edges: Default::default(),
        }));
        id
    }

    /// Number of ids handed out so far, live or not
    pub fn high_water(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.get(id).is_some()
    }

    pub fn mark_requested(&mut self, id: JobId) {
        if let Some(job) = self.slot_mut(id) {
            job.requested = true;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> + '_ {
        self.slots.iter().flatten()
    }

    pub fn ids(&self) -> impl Iterator<Item = JobId> + '_ {
        self.iter().map(|j| j.id)
    }

    /// Live jobs created at or after a `high_water` mark
    pub fn created_since(&self, mark: usize) -> Vec<JobId> {
        self.ids().filter(|id| id.0 >= mark).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Record `from --edge--> to` and its inverse
    pub fn link(&mut self, from: JobId, edge: Edge, to: JobId) {
        if from == to || !self.contains(from) || !self.contains(to) {
            return;
        }
        if let Some(job) = self.slot_mut(from) {
            job.edges_mut(edge).insert(to);
        }
        if let Some(job) = self.slot_mut(to) {
            job.edges_mut(edge.inverse()).insert(from);
        }
    }

    /// Take a job out of the arena, dropping every edge that points at it
    pub fn remove(&mut self, id: JobId) -> Option<Job> {
        let job = self.slots.get_mut(id.0)?.take()?;
        for edge in Edge::ALL {
            for &other in job.edges(edge) {
                if let Some(neighbor) = self.slot_mut(other) {
                    neighbor.edges_mut(edge.inverse()).remove(&id);
                }
            }
        }
        Some(job)
    }

    /// Fold `absorbed` into `survivor` (same unit), moving every edge over
    ///
    /// Returns `Ok(false)` when either job is no longer in the arena, in which
    /// case nothing changes.
    pub fn merge_into(&mut self, survivor: JobId, absorbed: JobId) -> Result<bool, ManagerError> {
        let (Some(keep), Some(gone)) = (self.get(survivor), self.get(absorbed)) else {
            log::trace!("merge of {:?} into {:?} skipped: job gone", absorbed, survivor);
            return Ok(false);
        };
        let merged_type = keep.job_type.merge(gone.job_type).ok_or_else(|| {
            ManagerError::Conflict {
                unit: keep.unit.name().to_string(),
                existing: keep.job_type,
                incoming: gone.job_type,
            }
        })?;

        let Some(gone) = self.remove(absorbed) else {
            return Ok(false);
        };
        if let Some(keep) = self.slot_mut(survivor) {
            keep.job_type = merged_type;
            keep.anchored |= gone.anchored;
            keep.requested |= gone.requested;
        }
        for edge in Edge::ALL {
            for &other in gone.edges(edge) {
                self.link(survivor, edge, other);
            }
        }
        Ok(true)
    }
}

/// Outcome of one dispatched (or skipped) job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    /// The action ran and succeeded
    Done,
    /// The unit was already in the target state
    Skipped,
    /// The action ran and failed
    Failed(String),
}

/// Per-unit result of a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub unit: String,
    pub job_type: JobType,
    pub outcome: JobOutcome,
}

impl JobReport {
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, JobOutcome::Failed(_))
    }
}
