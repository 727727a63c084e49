//! Job transactions
//!
//! A transaction turns one request ("start these units") into the full set of
//! jobs over the dependency closure, merges them down to one job per unit,
//! orders them, and dispatches them concurrently.
//!
//! Build phase (synchronous, all-or-nothing):
//! 1. `add` expands Requires/Wants/Conflicts into candidate jobs, keyed per
//!    unit by (job type, anchored).
//! 2. `merge` collapses the candidates of each unit into one job. A conflict
//!    between anchored jobs fails the transaction; optional losers are deleted.
//! 3. `order` derives after/before edges and linearizes them.
//!
//! Dispatch: every job runs in its own task, which first waits on the
//! readiness signal of each job it is ordered after. All waits are registered
//! before the first task is spawned, so launch order does not matter.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::graph::OrderGraph;
use super::job::{Edge, Job, JobArena, JobId, JobOutcome, JobReport, JobType};
use super::registry::{ActiveJob, Registry, Unit};
use super::ManagerError;
use crate::units;

/// How a new job hangs off the job that pulled it in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Requires,
    Wants,
    Conflicts,
}

impl Relation {
    fn edge(self) -> Edge {
        match self {
            Relation::Requires => Edge::Requires,
            Relation::Wants => Edge::Wants,
            Relation::Conflicts => Edge::Conflicts,
        }
    }
}

/// One entry of a dry run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedJob {
    pub unit: String,
    pub job_type: JobType,
    /// Units whose jobs this one waits for
    pub after: Vec<String>,
}

type Candidates = BTreeMap<(JobType, bool), JobId>;

#[derive(Debug)]
pub struct Transaction {
    id: u64,
    jobs: JobArena,
    unmerged: BTreeMap<String, Candidates>,
    merged: BTreeMap<String, JobId>,
    requested: BTreeSet<String>,
}

impl Transaction {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            jobs: JobArena::new(),
            unmerged: BTreeMap::new(),
            merged: BTreeMap::new(),
            requested: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn job(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    /// Final job of a unit, once merged
    pub fn merged_job(&self, unit: &str) -> Option<&Job> {
        self.merged
            .get(&units::normalize_name(unit))
            .and_then(|&id| self.jobs.get(id))
    }

    pub fn merged_len(&self) -> usize {
        self.merged.len()
    }

    /// Live candidate jobs of a unit
    pub fn candidates(&self, unit: &str) -> Vec<&Job> {
        self.unmerged
            .get(&units::normalize_name(unit))
            .into_iter()
            .flat_map(|c| c.values())
            .filter_map(|&id| self.jobs.get(id))
            .collect()
    }

    /// Ensure a `job_type` job exists for `name` and hang it off `parent`
    ///
    /// A job without a parent is one the caller asked for. Dependencies are
    /// expanded only when the job is newly created, and never for stop jobs.
    /// Errors on Requires/Conflicts targets propagate; errors on Wants targets
    /// are logged and whatever that attempt created is rolled back.
    pub fn add(
        &mut self,
        registry: &mut Registry,
        job_type: JobType,
        name: &str,
        parent: Option<(JobId, Relation)>,
        anchored: bool,
    ) -> Result<JobId, ManagerError> {
        let unit = registry.get(name)?;
        let key = (job_type, anchored);

        let existing = self
            .unmerged
            .get(unit.name())
            .and_then(|c| c.get(&key))
            .copied()
            .filter(|&id| self.jobs.contains(id));

        let (id, created) = match existing {
            Some(id) => (id, false),
            None => {
                let id = self.jobs.insert(job_type, Arc::clone(&unit), anchored);
                self.unmerged
                    .entry(unit.name().to_string())
                    .or_default()
                    .insert(key, id);
                log::trace!("tx {}: new job {}/{}", self.id, unit.name(), job_type);
                (id, true)
            }
        };

        match parent {
            Some((parent, relation)) => self.jobs.link(parent, relation.edge(), id),
            None => {
                self.jobs.mark_requested(id);
                self.requested.insert(unit.name().to_string());
            }
        }

        if created && job_type != JobType::Stop {
            self.expand(registry, id, &unit, job_type, anchored)?;
        }

        Ok(id)
    }

    fn expand(
        &mut self,
        registry: &mut Registry,
        id: JobId,
        unit: &Unit,
        job_type: JobType,
        anchored: bool,
    ) -> Result<(), ManagerError> {
        let deps = unit.dependencies();

        for name in &deps.conflicts {
            self.add(registry, JobType::Stop, name, Some((id, Relation::Conflicts)), anchored)?;
        }
        for name in &deps.requires {
            self.add(registry, job_type, name, Some((id, Relation::Requires)), anchored)?;
        }
        for name in &deps.wants {
            let mark = self.jobs.high_water();
            if let Err(e) = self.add(registry, job_type, name, Some((id, Relation::Wants)), false) {
                log::info!("{}: ignoring wanted unit {}: {}", unit.name(), name, e);
                self.rollback(mark);
            }
        }
        Ok(())
    }

    /// Discard every job created since `mark`, without cascading
    fn rollback(&mut self, mark: usize) {
        for id in self.jobs.created_since(mark) {
            if let Some(job) = self.jobs.remove(id) {
                self.forget(job.unit().name(), id);
            }
        }
    }

    fn forget(&mut self, unit: &str, id: JobId) {
        if let Some(candidates) = self.unmerged.get_mut(unit) {
            candidates.retain(|_, &mut c| c != id);
            if candidates.is_empty() {
                self.unmerged.remove(unit);
            }
        }
        if self.merged.get(unit) == Some(&id) {
            self.merged.remove(unit);
        }
    }

    /// Remove a job, cascading to whatever can no longer be satisfied
    ///
    /// Jobs that required or conflicted with the removed one go too. Jobs it
    /// required or conflicted with go if nothing else needs them anymore.
    /// Wants edges are only unlinked.
    pub fn delete(&mut self, id: JobId) {
        let Some(job) = self.jobs.remove(id) else {
            return;
        };
        self.forget(job.unit().name(), id);
        log::debug!("tx {}: deleted job {}", self.id, job);

        let dependents = job
            .edges(Edge::RequiredBy)
            .iter()
            .chain(job.edges(Edge::ConflictedBy));
        for &dependent in dependents {
            self.delete(dependent);
        }

        let dependencies = job
            .edges(Edge::Requires)
            .iter()
            .chain(job.edges(Edge::Conflicts));
        for &dependency in dependencies {
            if self.jobs.get(dependency).is_some_and(Job::is_orphan) {
                self.delete(dependency);
            }
        }
    }

    /// Collapse the candidates of every unit into a single job
    pub fn merge(&mut self) -> Result<(), ManagerError> {
        let names: Vec<String> = self.unmerged.keys().cloned().collect();

        for name in names {
            let live: Vec<JobId> = self
                .unmerged
                .get(&name)
                .into_iter()
                .flat_map(|c| c.values().copied())
                .filter(|&id| self.jobs.contains(id))
                .collect();

            let (anchored, mut optional): (Vec<JobId>, Vec<JobId>) = live
                .into_iter()
                .partition(|&id| self.jobs.get(id).is_some_and(Job::is_anchored));
            // Keep non-stop optional jobs in preference to stop jobs
            optional.sort_by_key(|&id| self.jobs.get(id).map(Job::job_type) == Some(JobType::Stop));

            let mut survivor: Option<JobId> = None;
            for id in anchored {
                match survivor {
                    None => survivor = Some(id),
                    Some(keep) => {
                        self.jobs.merge_into(keep, id)?;
                    }
                }
            }
            for id in optional {
                // An earlier deletion may have cascaded into either job
                if !self.jobs.contains(id) {
                    continue;
                }
                let Some(keep) = survivor.filter(|&keep| self.jobs.contains(keep)) else {
                    survivor = Some(id);
                    continue;
                };
                if let Err(e) = self.jobs.merge_into(keep, id) {
                    if let Some(job) = self.jobs.get(id) {
                        log::info!("tx {}: dropping optional job {}: {}", self.id, job, e);
                    }
                    self.delete(id);
                }
            }
        }

        self.merged = self
            .jobs
            .iter()
            .map(|job| (job.unit().name().to_string(), job.id()))
            .collect();

        for name in &self.requested {
            let kept = self
                .merged
                .get(name)
                .and_then(|&id| self.jobs.get(id))
                .is_some_and(Job::is_requested);
            if !kept {
                return Err(ManagerError::Dropped {
                    unit: name.clone(),
                });
            }
        }

        log::debug!(
            "tx {}: {} jobs after merge",
            self.id,
            self.merged.len()
        );
        Ok(())
    }

    /// Link after/before edges between merged jobs and linearize them
    ///
    /// Stop jobs take no part in ordering.
    pub fn order(&mut self) -> Result<Vec<JobId>, ManagerError> {
        let merged: Vec<JobId> = self.merged.values().copied().collect();

        for &id in &merged {
            let deps = match self.jobs.get(id) {
                Some(job) if job.job_type() != JobType::Stop => job.unit().dependencies(),
                _ => continue,
            };

            for name in &deps.after {
                if let Some(other) = self.orderable(name) {
                    self.jobs.link(id, Edge::After, other);
                }
            }
            for name in &deps.before {
                if let Some(other) = self.orderable(name) {
                    self.jobs.link(other, Edge::After, id);
                }
            }
        }

        let jobs: Vec<&Job> = merged.iter().filter_map(|&id| self.jobs.get(id)).collect();
        let mut graph = OrderGraph::new();
        for job in &jobs {
            graph.add_node(job.id(), job.unit().name());
        }
        for job in &jobs {
            for &pred in job.edges(Edge::After) {
                graph.add_edge(job.id(), pred);
            }
        }

        let order = graph.linearize().map_err(|e| {
            log::warn!("tx {}: {}", self.id, e);
            ManagerError::Cycle(e.chain)
        })?;
        log::debug!(
            "tx {}: order {}",
            self.id,
            order
                .iter()
                .filter_map(|&id| self.jobs.get(id))
                .map(Job::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(order)
    }

    /// Merged non-stop job of the named unit
    fn orderable(&self, name: &str) -> Option<JobId> {
        self.merged
            .get(&units::normalize_name(name))
            .copied()
            .filter(|&id| self.jobs.get(id).is_some_and(|j| j.job_type() != JobType::Stop))
    }

    /// Merge and order without dispatching anything
    pub fn plan(mut self) -> Result<Vec<PlannedJob>, ManagerError> {
        self.merge()?;
        let order = self.order()?;

        Ok(order
            .into_iter()
            .filter_map(|id| self.jobs.get(id))
            .map(|job| PlannedJob {
                unit: job.unit().name().to_string(),
                job_type: job.job_type(),
                after: job
                    .edges(Edge::After)
                    .iter()
                    .filter_map(|&p| self.jobs.get(p))
                    .map(|p| p.unit().name().to_string())
                    .collect(),
            })
            .collect())
    }

    /// Merge, order and dispatch. Returns one report per merged job, in order.
    ///
    /// Structural failures return `Err` before anything runs. Runtime failures
    /// of individual jobs show up in their reports and do not stop the others.
    pub async fn run(self) -> Result<Vec<JobReport>, ManagerError> {
        Ok(self.prepare()?.execute().await)
    }

    /// Everything up to launching: merge, order, skip redundant jobs, claim
    /// the units and register the readiness waits
    ///
    /// A unit that already has a job from another transaction fails the whole
    /// transaction with `Busy` if this job is anchored. An optional job on a
    /// busy unit is deleted instead, together with whatever needed it, and
    /// reported as failed.
    pub fn prepare(mut self) -> Result<Dispatch, ManagerError> {
        self.merge()?;
        let order = self.order()?;

        let mut reports: Vec<Option<JobReport>> = vec![None; order.len()];
        let mut claimed: Vec<Claim> = Vec::new();
        for (slot, &id) in order.iter().enumerate() {
            let Some(job) = self.jobs.get(id) else {
                continue;
            };
            if job.is_redundant() {
                log::info!("{} is redundant, skipping", job);
                reports[slot] = Some(report(job, JobOutcome::Skipped));
                continue;
            }

            let active = ActiveJob {
                transaction: self.id,
                job_type: job.job_type(),
            };
            if job.unit().try_attach_job(active) {
                claimed.push(Claim {
                    slot,
                    id,
                    unit: Arc::clone(job.unit()),
                });
                continue;
            }

            let busy = job.unit().name().to_string();
            if job.is_anchored() {
                release(&claimed);
                return Err(ManagerError::Busy(busy));
            }
            log::info!("tx {}: dropping optional job {}: unit is busy", self.id, job);
            self.drop_busy(id, &busy, &order, &mut reports, &mut claimed);
        }

        if let Some(name) = self.requested.iter().find(|n| !self.merged.contains_key(*n)) {
            release(&claimed);
            return Err(ManagerError::Dropped { unit: name.clone() });
        }

        // Waits go in before anything is launched so no completion is missed
        let running: BTreeSet<JobId> = claimed.iter().map(|c| c.id).collect();
        let mut waits: BTreeMap<JobId, Vec<oneshot::Receiver<()>>> = BTreeMap::new();
        for claim in &claimed {
            let Some(job) = self.jobs.get(claim.id) else {
                continue;
            };
            let rxs = job
                .edges(Edge::After)
                .iter()
                .filter_map(|pred| {
                    let unit = self.jobs.get(*pred)?.unit();
                    if running.contains(pred) {
                        Some(unit.signal().wait_for())
                    } else {
                        // Nothing to do here, but another transaction may still be at it
                        unit.wait_for_current_job()
                    }
                })
                .collect();
            waits.insert(claim.id, rxs);
        }

        let pending = claimed
            .into_iter()
            .filter_map(|claim| {
                let rxs = waits.remove(&claim.id).unwrap_or_default();
                match self.jobs.remove(claim.id) {
                    Some(job) => Some((claim.slot, job, rxs)),
                    None => {
                        claim.unit.detach_job();
                        None
                    }
                }
            })
            .collect();

        Ok(Dispatch {
            transaction: self.id,
            reports,
            pending,
        })
    }

    /// Delete an optional job whose unit is busy and report everything the
    /// deletion took with it. Units claimed for removed jobs are released.
    fn drop_busy(
        &mut self,
        id: JobId,
        busy: &str,
        order: &[JobId],
        reports: &mut [Option<JobReport>],
        claimed: &mut Vec<Claim>,
    ) {
        let before: Vec<(usize, JobId, JobReport)> = order
            .iter()
            .enumerate()
            .filter(|(slot, _)| reports[*slot].is_none())
            .filter_map(|(slot, &other)| {
                let job = self.jobs.get(other)?;
                let reason = if other == id {
                    ManagerError::Busy(busy.to_string()).to_string()
                } else {
                    format!("dependency {} is busy", busy)
                };
                Some((slot, other, report(job, JobOutcome::Failed(reason))))
            })
            .collect();

        self.delete(id);

        for (slot, other, failed) in before {
            if !self.jobs.contains(other) {
                reports[slot] = Some(failed);
            }
        }
        claimed.retain(|claim| {
            let live = self.jobs.contains(claim.id);
            if !live {
                claim.unit.detach_job();
            }
            live
        });
    }
}

/// A unit claimed for one job of a transaction being prepared
struct Claim {
    slot: usize,
    id: JobId,
    unit: Arc<Unit>,
}

fn release(claimed: &[Claim]) {
    for claim in claimed {
        claim.unit.detach_job();
    }
}

/// A prepared transaction whose units are claimed and whose jobs are ready to launch
///
/// Dropping it without calling `execute` releases the claimed units and wakes
/// anyone waiting on them.
#[derive(Debug)]
pub struct Dispatch {
    transaction: u64,
    reports: Vec<Option<JobReport>>,
    pending: Vec<(usize, Job, Vec<oneshot::Receiver<()>>)>,
}

impl Dispatch {
    /// Jobs that will actually run
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Launch every job and wait for all of them
    pub async fn execute(mut self) -> Vec<JobReport> {
        let pending = std::mem::take(&mut self.pending);
        log::info!(
            "tx {}: dispatching {} jobs",
            self.transaction,
            pending.len()
        );

        let mut handles = Vec::with_capacity(pending.len());
        for (slot, mut job, rxs) in pending {
            let unit = job.unit().name().to_string();
            let job_type = job.job_type();

            let handle = tokio::spawn(async move {
                for rx in rxs {
                    // A dropped sender still means the predecessor is done
                    let _ = rx.await;
                }
                let outcome = match job.run().await {
                    Ok(()) => JobOutcome::Done,
                    Err(e) => {
                        log::warn!("{} failed: {}", job, e);
                        JobOutcome::Failed(e.to_string())
                    }
                };
                report(&job, outcome)
            });
            handles.push((slot, unit, job_type, handle));
        }

        for (slot, unit, job_type, handle) in handles {
            self.reports[slot] = Some(match handle.await {
                Ok(report) => report,
                Err(e) => JobReport {
                    unit,
                    job_type,
                    outcome: JobOutcome::Failed(e.to_string()),
                },
            });
        }

        std::mem::take(&mut self.reports).into_iter().flatten().collect()
    }
}

impl Drop for Dispatch {
    fn drop(&mut self) {
        for (_, job, _) in &self.pending {
            job.unit().detach_job();
            job.unit().signal().notify_ready();
        }
    }
}

fn report(job: &Job, outcome: JobOutcome) -> JobReport {
    JobReport {
        unit: job.unit().name().to_string(),
        job_type: job.job_type(),
        outcome,
    }
}
