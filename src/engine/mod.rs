//! Orchestration engine
//!
//! Wires the registry, scheduler and context store together behind the
//! command surface. Every command follows the same write-ahead rule: the
//! run is mutated on a copy, the copy is sealed into the next snapshot,
//! and only once that snapshot is durable does the copy become current.

mod report;

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capability::{
    Capability, CapabilityRegistry, DelegationRouter, RegisteredCapability, Registration,
    RegistryTable,
};
use crate::checkpoint::{Checkpoint, CheckpointGate, Verdict};
use crate::clock::{Clock, SystemClock};
use crate::config::{expand_path, OrchestratorConfig};
use crate::context::{ContextSnapshot, ContextStore, FileStore};
use crate::error::{Error, Result};
use crate::rules::{RuleSet, RuleValidator};
use crate::workflow::{
    Goal, RunStatus, Scheduler, Severity, TaskSpec, TransitionRecord, WorkflowRun,
};

use report::{RunReport, RunSummary};

/// Capacity of the notification channel
const EVENT_BUFFER: usize = 256;

/// A journal record published to in-process subscribers
#[derive(Debug, Clone)]
pub struct EngineEvent {
    pub run_id: String,
    pub record: TransitionRecord,
}

/// Outcome of registering a capability
#[derive(Debug, Clone)]
pub struct RegistrationOutcome {
    pub registration: Registration,
    /// `(run id, task id)` pairs assigned as a consequence
    pub unblocked: Vec<(String, String)>,
}

type RunHandle = Arc<Mutex<WorkflowRun>>;

pub struct Engine {
    registry: Arc<CapabilityRegistry>,
    scheduler: Scheduler,
    store: Arc<dyn ContextStore>,
    clock: Arc<dyn Clock>,
    runs: RwLock<BTreeMap<String, RunHandle>>,
    /// Held shared by every command that may route a task, exclusively by
    /// deregistration, so an in-use check cannot race an assignment
    routing: RwLock<()>,
    events: broadcast::Sender<EngineEvent>,
}

impl Engine {
    /// Build an engine over the on-disk store described by `config`
    pub fn from_config(config: &OrchestratorConfig) -> Result<Self> {
        let store = FileStore::open(config.data_dir())?;
        let rules = match &config.rules.file {
            Some(path) => RuleSet::load(Path::new(&expand_path(path)))?,
            None => RuleSet::empty(),
        };
        Self::new(
            Arc::new(store),
            rules,
            config.engine.escalation_window_secs,
            Arc::new(SystemClock),
        )
    }

    /// Build an engine and load the registry table and every run's
    /// latest snapshot from `store`
    pub fn new(
        store: Arc<dyn ContextStore>,
        rules: RuleSet,
        escalation_window_secs: u64,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let registry = Arc::new(match store.load_registry()? {
            Some(table) => CapabilityRegistry::from_table(table),
            None => CapabilityRegistry::new(),
        });
        let gate = CheckpointGate::new(RuleValidator::new(Arc::new(rules)), escalation_window_secs);
        let scheduler = Scheduler::new(DelegationRouter::new(registry.clone()), gate);

        let mut runs = BTreeMap::new();
        for run_id in store.run_ids()? {
            if let Some(run) = load_run(store.as_ref(), &run_id)? {
                runs.insert(run_id, Arc::new(Mutex::new(run)));
            }
        }
        debug!(
            runs = runs.len(),
            capabilities = registry.len(),
            "Engine state loaded"
        );

        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Ok(Self {
            registry,
            scheduler,
            store,
            clock,
            runs: RwLock::new(runs),
            routing: RwLock::new(()),
            events,
        })
    }

    /// Receive every journal record written from now on
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    // ─────────────────────────────────────────────────────────────
    // Runs
    // ─────────────────────────────────────────────────────────────

    /// Admit a decomposed goal as a new run and assign its ready tasks
    pub fn start(&self, goal: Goal) -> Result<String> {
        if goal.tasks.is_empty() {
            return Err(Error::validation("<goal>", "goal has no tasks"));
        }
        let _routing = self.routing.read();
        let now = self.clock.now();
        let id = format!("run-{}", Uuid::new_v4().simple());
        let before = self.registry.table();

        let mut run = WorkflowRun::new(&id, goal.description, now);
        run.record(now, &id, "-", RunStatus::Running, Severity::Info, "run started");
        let sealed = self
            .scheduler
            .admit(&mut run, goal.tasks, now)
            .and_then(|_| self.scheduler.advance(&mut run, now))
            .and_then(|_| {
                run.sequence = 1;
                self.store.append(&ContextSnapshot::capture(&run, now)?)
            })
            .and_then(|_| self.persist_registry_since(before.assignment_seq));
        if let Err(e) = sealed {
            self.rollback_stamps(before);
            return Err(e);
        }
        let records = run.journal.clone();
        self.runs.write().insert(id.clone(), Arc::new(Mutex::new(run)));
        self.publish(&id, records);

        info!(run = %id, "Run started");
        Ok(id)
    }

    pub fn status(&self, run_id: &str) -> Result<RunReport> {
        let handle = self.handle(run_id)?;
        let run = handle.lock();
        Ok(RunReport::build(&run, &self.scheduler.topological_order(&run)))
    }

    pub fn list_runs(&self) -> Vec<RunSummary> {
        self.runs
            .read()
            .values()
            .map(|handle| RunSummary::build(&handle.lock()))
            .collect()
    }

    pub fn history(&self, run_id: &str) -> Result<Vec<TransitionRecord>> {
        Ok(self.handle(run_id)?.lock().journal.clone())
    }

    /// Admit worker-emitted sub-tasks into a running run
    pub fn add_tasks(&self, run_id: &str, batch: Vec<TaskSpec>) -> Result<Vec<String>> {
        self.transact(run_id, |scheduler, run, now| {
            let admitted = scheduler.admit(run, batch, now)?;
            scheduler.advance(run, now)?;
            Ok(admitted)
        })
    }

    pub fn submit_artifact(&self, run_id: &str, task_id: &str, artifact: Value) -> Result<Checkpoint> {
        self.transact(run_id, |scheduler, run, now| {
            scheduler.submit_artifact(run, task_id, artifact, now)
        })
    }

    pub fn decide(
        &self,
        checkpoint_id: &str,
        verdict: Verdict,
        reviewer: Option<&str>,
    ) -> Result<Checkpoint> {
        let run_id = self.run_owning(checkpoint_id)?;
        self.transact(&run_id, |scheduler, run, now| {
            scheduler.decide(run, checkpoint_id, verdict, reviewer, now)
        })
    }

    pub fn claim(&self, checkpoint_id: &str, reviewer: &str) -> Result<Checkpoint> {
        let run_id = self.run_owning(checkpoint_id)?;
        self.transact(&run_id, |scheduler, run, now| {
            scheduler.claim(run, checkpoint_id, reviewer, now)
        })
    }

    /// Stop advancing a run. Its snapshots already hold everything needed.
    pub fn suspend(&self, run_id: &str) -> Result<()> {
        self.transact(run_id, |scheduler, run, now| scheduler.suspend(run, now))
    }

    /// Reload a run from its highest snapshot and continue it
    pub fn resume(&self, run_id: &str) -> Result<Vec<String>> {
        let handle = self.handle(run_id)?;
        let snapshot = self
            .store
            .latest(run_id)?
            .ok_or_else(|| Error::not_found("run", run_id))?;
        {
            let mut current = handle.lock();
            if *current != snapshot.state {
                warn!(run = %run_id, "In-memory state differs from latest snapshot; using snapshot");
            }
            *current = snapshot.state;
        }
        self.transact(run_id, |scheduler, run, now| scheduler.resume(run, now))
    }

    /// Abort a whole run, or one task and its dependents
    pub fn abort(&self, run_id: &str, task_id: Option<&str>) -> Result<Vec<String>> {
        self.transact(run_id, |scheduler, run, now| match task_id {
            Some(task_id) => scheduler.abort_task(run, task_id, now),
            None => scheduler.abort_run(run, now),
        })
    }

    /// One escalation sweep across all running runs.
    /// Returns `(run id, checkpoint id)` for every new escalation.
    pub fn escalate_overdue(&self) -> Result<Vec<(String, String)>> {
        self.load_new_runs()?;
        let mut escalated = Vec::new();
        for run_id in self.run_ids() {
            let ids = self.transact(&run_id, |scheduler, run, now| {
                Ok(scheduler.escalate_overdue(run, now))
            })?;
            escalated.extend(ids.into_iter().map(|c| (run_id.clone(), c)));
        }
        Ok(escalated)
    }

    /// Sweep for overdue checkpoints every `every` until `shutdown` resolves
    pub async fn watch<F>(&self, every: Duration, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut timer = tokio::time::interval(every);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_secs = every.as_secs(), "Escalation watcher started");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Escalation watcher stopped");
                    return Ok(());
                }
                _ = timer.tick() => {
                    match self.escalate_overdue() {
                        Ok(escalated) if !escalated.is_empty() => {
                            info!(count = escalated.len(), "Escalation sweep finished");
                        }
                        Ok(_) => debug!("Escalation sweep found nothing overdue"),
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => warn!(error = %e.format_for_log(), "Escalation sweep failed"),
                    }
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Capabilities
    // ─────────────────────────────────────────────────────────────

    /// Register a capability, persist the table, then retry blocked tasks
    pub fn register_capability(&self, capability: Capability) -> Result<RegistrationOutcome> {
        let before = self.registry.table();
        let registration = self.registry.register(capability, self.clock.now())?;
        if registration != Registration::Unchanged {
            if let Err(e) = self.store.save_registry(&self.registry.table()) {
                self.registry.restore(before);
                return Err(e);
            }
        }

        let mut unblocked = Vec::new();
        for run_id in self.run_ids() {
            let assigned = self.transact(&run_id, |scheduler, run, now| scheduler.advance(run, now))?;
            unblocked.extend(assigned.into_iter().map(|t| (run_id.clone(), t)));
        }
        Ok(RegistrationOutcome {
            registration,
            unblocked,
        })
    }

    /// Remove a capability not assigned to any non-terminal task
    pub fn deregister_capability(&self, id: &str) -> Result<Capability> {
        let _routing = self.routing.write();
        let active: Vec<String> = self
            .runs
            .read()
            .values()
            .flat_map(|handle| handle.lock().active_assignments(id))
            .collect();

        let before = self.registry.table();
        let removed = self.registry.deregister(id, active)?;
        if let Err(e) = self.store.save_registry(&self.registry.table()) {
            self.registry.restore(before);
            return Err(e);
        }
        Ok(removed)
    }

    pub fn capabilities(&self) -> Vec<RegisteredCapability> {
        self.registry.list()
    }

    /// Capabilities covering `tags`, most specific first
    pub fn lookup(&self, tags: &BTreeSet<String>) -> Vec<Capability> {
        self.registry.lookup(tags)
    }

    // ─────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────

    fn handle(&self, run_id: &str) -> Result<RunHandle> {
        self.runs
            .read()
            .get(run_id)
            .cloned()
            .ok_or_else(|| Error::not_found("run", run_id))
    }

    /// Pick up runs started by other processes
    fn load_new_runs(&self) -> Result<()> {
        for run_id in self.store.run_ids()? {
            if self.runs.read().contains_key(&run_id) {
                continue;
            }
            if let Some(run) = load_run(self.store.as_ref(), &run_id)? {
                debug!(run = %run_id, "Loaded run from store");
                self.runs
                    .write()
                    .entry(run_id)
                    .or_insert_with(|| Arc::new(Mutex::new(run)));
            }
        }
        Ok(())
    }

    fn run_ids(&self) -> Vec<String> {
        self.runs.read().keys().cloned().collect()
    }

    fn run_owning(&self, checkpoint_id: &str) -> Result<String> {
        self.runs
            .read()
            .iter()
            .find(|(_, handle)| handle.lock().owns_checkpoint(checkpoint_id))
            .map(|(id, _)| id.clone())
            .ok_or_else(|| Error::not_found("checkpoint", checkpoint_id))
    }

    /// Apply `op` to a copy of the run and make it current only after its
    /// snapshot is durable. A failed op or append leaves the run and the
    /// registry's assignment stamps untouched.
    fn transact<T, F>(&self, run_id: &str, op: F) -> Result<T>
    where
        F: FnOnce(&Scheduler, &mut WorkflowRun, DateTime<Utc>) -> Result<T>,
    {
        let _routing = self.routing.read();
        let handle = self.handle(run_id)?;
        let mut current = handle.lock();
        // Another process may have advanced the run since it was loaded
        if let Some(latest) = self.store.latest(run_id)? {
            if latest.sequence > current.sequence {
                debug!(run = %run_id, sequence = latest.sequence, "Reloaded newer snapshot");
                *current = latest.state;
            }
        }
        let before = self.registry.table();
        let now = self.clock.now();

        let mut next = current.clone();
        let out = match op(&self.scheduler, &mut next, now) {
            Ok(out) => out,
            Err(e) => {
                self.rollback_stamps(before);
                return Err(e);
            }
        };
        if next == *current {
            return Ok(out);
        }

        let journal_from = current.journal.len();
        next.sequence = current.sequence + 1;
        next.updated_at = now;
        let sealed = ContextSnapshot::capture(&next, now)
            .and_then(|snapshot| self.store.append(&snapshot))
            .and_then(|_| self.persist_registry_since(before.assignment_seq));
        if let Err(e) = sealed {
            self.rollback_stamps(before);
            return Err(e);
        }

        let records = next.journal[journal_from..].to_vec();
        debug!(run = %run_id, sequence = next.sequence, "Run state advanced");
        *current = next;
        drop(current);

        self.publish(run_id, records);
        Ok(out)
    }

    /// Persist least-recently-used stamps if the router assigned anything
    fn persist_registry_since(&self, stamp: u64) -> Result<()> {
        if self.registry.assignment_seq() != stamp {
            self.store.save_registry(&self.registry.table())?;
        }
        Ok(())
    }

    /// Undo assignment stamps taken by a command that did not commit
    fn rollback_stamps(&self, before: RegistryTable) {
        if self.registry.assignment_seq() != before.assignment_seq {
            debug!("Rolling back assignment stamps");
            self.registry.restore(before);
        }
    }

    fn publish(&self, run_id: &str, records: Vec<TransitionRecord>) {
        for record in records {
            match record.severity {
                Severity::Warning => warn!(run = %run_id, subject = %record.subject, "{}", record.message),
                Severity::Notice => info!(run = %run_id, subject = %record.subject, "{}", record.message),
                Severity::Info => {}
            }
            // No subscribers is fine
            let _ = self.events.send(EngineEvent {
                run_id: run_id.to_string(),
                record,
            });
        }
    }
}

/// Latest state of a run, or `None` if the run is missing or its newest
/// snapshot fails verification. A corrupt run is left on disk and skipped.
fn load_run(store: &dyn ContextStore, run_id: &str) -> Result<Option<WorkflowRun>> {
    match store.latest(run_id) {
        Ok(snapshot) => Ok(snapshot.map(|s| s.state)),
        Err(e @ (Error::SnapshotCorrupted { .. } | Error::Json(_))) => {
            warn!(run = %run_id, error = %e.format_for_log(), "Skipping unreadable run");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
