//! Workflow graph scheduler: the sole writer of task status.
//!
//! Each method takes one run by `&mut` and applies a single logical
//! transition. Validation happens before any mutation, so a failed call
//! leaves the run exactly as it was.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::capability::{DelegationRouter, RoutingRequest};
use crate::checkpoint::{Checkpoint, CheckpointGate, GateState, Verdict};
use crate::error::{Error, Result};
use crate::rules::TaskContext;

use super::graph::TaskGraph;
use super::types::{RunStatus, Severity, Task, TaskSpec, TaskStatus, WorkflowRun};

pub struct Scheduler {
    router: DelegationRouter,
    gate: CheckpointGate,
}

impl Scheduler {
    pub fn new(router: DelegationRouter, gate: CheckpointGate) -> Self {
        Self { router, gate }
    }

    // ─────────────────────────────────────────────────────────────
    // Admission
    // ─────────────────────────────────────────────────────────────

    /// Admit a batch of tasks. The whole batch is rejected on a duplicate
    /// id, an unknown dependency or parent, or a cycle.
    pub fn admit(
        &self,
        run: &mut WorkflowRun,
        batch: Vec<TaskSpec>,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        ensure_running(run)?;
        if batch.is_empty() {
            return Err(Error::validation(&run.id, "task batch is empty"));
        }

        let mut seen = BTreeSet::new();
        for spec in &batch {
            if spec.id.trim().is_empty() {
                return Err(Error::validation(&run.id, "task id must not be empty"));
            }
            if run.tasks.contains_key(&spec.id) || !seen.insert(spec.id.as_str()) {
                return Err(Error::validation(&spec.id, "duplicate task id"));
            }
        }
        for spec in &batch {
            if let Some(parent) = &spec.parent {
                if !run.tasks.contains_key(parent) && !seen.contains(parent.as_str()) {
                    return Err(Error::validation(
                        &spec.id,
                        format!("parent task '{}' does not exist", parent),
                    ));
                }
            }
            for dep in &spec.depends_on {
                if run.tasks.get(dep).map(|t| t.status) == Some(TaskStatus::Aborted) {
                    return Err(Error::validation(
                        &spec.id,
                        format!("depends on aborted task '{}'", dep),
                    ));
                }
            }
        }

        let graph = TaskGraph::build(
            run.tasks
                .values()
                .map(|t| (t.id.as_str(), &t.depends_on))
                .chain(batch.iter().map(|s| (s.id.as_str(), &s.depends_on))),
        )?;
        if let Some(cycle) = graph.find_cycle() {
            return Err(Error::CyclicDependency {
                run_id: run.id.clone(),
                cycle,
            });
        }

        let mut admitted = Vec::with_capacity(batch.len());
        for spec in batch {
            let task = Task::from_spec(spec, now);
            let id = task.id.clone();
            run.record(now, &id, "-", TaskStatus::Pending, Severity::Info, "task admitted");
            run.tasks.insert(id.clone(), task);
            admitted.push(id);
        }
        info!(run = %run.id, count = admitted.len(), "Tasks admitted");
        Ok(admitted)
    }

    // ─────────────────────────────────────────────────────────────
    // Execution
    // ─────────────────────────────────────────────────────────────

    /// Unassigned tasks whose dependencies are all approved, in dependency order
    pub fn ready_tasks(&self, run: &WorkflowRun) -> Vec<String> {
        topological_ids(run)
            .into_iter()
            .filter(|id| {
                run.tasks.get(id).is_some_and(|task| {
                    matches!(
                        task.status,
                        TaskStatus::Pending | TaskStatus::BlockedNoCapability
                    ) && task.depends_on.iter().all(|dep| {
                        run.tasks.get(dep).map(|d| d.status) == Some(TaskStatus::Approved)
                    })
                })
            })
            .collect()
    }

    /// Hand every ready task to the router. Returns the ids newly assigned.
    /// Does nothing unless the run is `RUNNING`.
    pub fn advance(&self, run: &mut WorkflowRun, now: DateTime<Utc>) -> Result<Vec<String>> {
        if run.status != RunStatus::Running {
            debug!(run = %run.id, status = %run.status, "Run not advanced");
            return Ok(Vec::new());
        }

        let mut assigned = Vec::new();
        for id in self.ready_tasks(run) {
            if self.route(run, &id, None, now)? {
                assigned.push(id);
            }
        }
        Ok(assigned)
    }

    /// Route one task. `Ok(false)` means it was parked for lack of a capability.
    fn route(
        &self,
        run: &mut WorkflowRun,
        task_id: &str,
        previous: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let task = run.task(task_id)?;
        let from = task.status;
        let required = task.required_tags.clone();

        let request = RoutingRequest {
            task_id,
            required: &required,
            previous,
        };
        match self.router.assign(request) {
            Ok(capability) => {
                let task = run.task_mut(task_id)?;
                task.assigned_capability = Some(capability.id.clone());
                task.brief = capability.brief.clone();
                task.status = TaskStatus::InProgress;
                task.updated_at = now;
                run.record(
                    now,
                    task_id,
                    from,
                    TaskStatus::InProgress,
                    Severity::Info,
                    format!("assigned to {}", capability.id),
                );
                Ok(true)
            }
            Err(e) if e.is_recoverable() => {
                if from != TaskStatus::BlockedNoCapability {
                    let task = run.task_mut(task_id)?;
                    task.assigned_capability = None;
                    task.brief = None;
                    task.updated_at = now;
                    task.status = TaskStatus::BlockedNoCapability;
                    let tags: Vec<&str> = required.iter().map(String::as_str).collect();
                    run.record(
                        now,
                        task_id,
                        from,
                        TaskStatus::BlockedNoCapability,
                        Severity::Notice,
                        format!(
                            "no capability covers [{}]; register one to continue",
                            tags.join(", ")
                        ),
                    );
                    warn!(run = %run.id, task = %task_id, "Task blocked: no capability");
                }
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Artifacts and Decisions
    // ─────────────────────────────────────────────────────────────

    /// Record a produced artifact and open its checkpoint. A validation
    /// failure sends the task straight back to rework.
    pub fn submit_artifact(
        &self,
        run: &mut WorkflowRun,
        task_id: &str,
        artifact: Value,
        now: DateTime<Utc>,
    ) -> Result<Checkpoint> {
        ensure_running(run)?;
        let task = run.task(task_id)?;
        if task.status != TaskStatus::InProgress {
            return Err(Error::invalid_state(
                task_id,
                format!("task is {}, expected IN_PROGRESS", task.status),
            ));
        }

        let ckpt = {
            let ctx = TaskContext {
                run_id: &run.id,
                task_id: &task.id,
                description: &task.description,
                required_tags: &task.required_tags,
                capability_id: task.assigned_capability.as_deref(),
            };
            self.gate.open(&ctx, &artifact, now)
        };

        let task = run.task_mut(task_id)?;
        task.artifact = Some(artifact);
        task.checkpoint_id = Some(ckpt.id.clone());
        task.updated_at = now;
        record_gate_path(run, &ckpt, now);

        if ckpt.state == GateState::AwaitingReview {
            run.task_mut(task_id)?.status = TaskStatus::UnderReview;
            run.record(
                now,
                task_id,
                TaskStatus::InProgress,
                TaskStatus::UnderReview,
                Severity::Info,
                format!("checkpoint {} awaiting review", ckpt.id),
            );
            run.checkpoints.insert(ckpt.id.clone(), ckpt.clone());
        } else {
            run.archived.push(ckpt.clone());
            let reason = ckpt.rejection_reason.clone().unwrap_or_default();
            self.rework(run, task_id, &reason, now)?;
        }
        Ok(ckpt)
    }

    /// Apply a human decision to an open checkpoint of this run
    pub fn decide(
        &self,
        run: &mut WorkflowRun,
        checkpoint_id: &str,
        verdict: Verdict,
        reviewer: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Checkpoint> {
        let mut ckpt = open_checkpoint(run, checkpoint_id)?.clone();
        ensure_running(run)?;

        let from = ckpt.state;
        self.gate.decide(&mut ckpt, verdict, reviewer, now)?;
        run.checkpoints.remove(checkpoint_id);
        run.archived.push(ckpt.clone());
        run.record(
            now,
            checkpoint_id,
            from,
            ckpt.state,
            Severity::Info,
            match &ckpt.reviewer {
                Some(r) => format!("decided by {}", r),
                None => "decided".to_string(),
            },
        );

        let task_id = ckpt.task_id.clone();
        if ckpt.state == GateState::Approved {
            let task = run.task_mut(&task_id)?;
            task.status = TaskStatus::Approved;
            task.updated_at = now;
            run.record(
                now,
                &task_id,
                TaskStatus::UnderReview,
                TaskStatus::Approved,
                Severity::Info,
                "artifact approved",
            );
            self.refresh_status(run, now);
            self.advance(run, now)?;
        } else {
            let reason = ckpt.rejection_reason.clone().unwrap_or_default();
            self.rework(run, &task_id, &reason, now)?;
        }
        Ok(ckpt)
    }

    /// Record reviewer identity on an open checkpoint
    pub fn claim(
        &self,
        run: &mut WorkflowRun,
        checkpoint_id: &str,
        reviewer: &str,
        now: DateTime<Utc>,
    ) -> Result<Checkpoint> {
        ensure_running(run)?;
        let mut ckpt = open_checkpoint(run, checkpoint_id)?.clone();
        let from = ckpt.state;
        self.gate.claim(&mut ckpt, reviewer, now)?;
        run.record(
            now,
            checkpoint_id,
            from,
            ckpt.state,
            Severity::Info,
            format!("claimed by {}", reviewer),
        );
        run.checkpoints.insert(ckpt.id.clone(), ckpt.clone());
        Ok(ckpt)
    }

    /// Return a rejected task to work, preferring a different capability
    fn rework(
        &self,
        run: &mut WorkflowRun,
        task_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let task = run.task_mut(task_id)?;
        let from = task.status;
        let previous = task.assigned_capability.clone();
        task.rework_count += 1;
        task.status = TaskStatus::InProgress;
        task.updated_at = now;
        let cycle = task.rework_count;
        run.record(
            now,
            task_id,
            from,
            TaskStatus::InProgress,
            Severity::Info,
            format!("rework #{}: {}", cycle, reason),
        );

        self.route(run, task_id, previous.as_deref(), now)?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // Escalation
    // ─────────────────────────────────────────────────────────────

    /// Escalate overdue checkpoints of a running run. Returns their ids.
    pub fn escalate_overdue(&self, run: &mut WorkflowRun, now: DateTime<Utc>) -> Vec<String> {
        if run.status != RunStatus::Running {
            return Vec::new();
        }
        let mut escalated = Vec::new();
        for ckpt in run.checkpoints.values_mut() {
            if self.gate.escalate_if_overdue(ckpt, now) {
                escalated.push((ckpt.id.clone(), ckpt.task_id.clone(), ckpt.escalation_window_secs));
            }
        }
        for (id, task_id, window) in &escalated {
            run.record(
                now,
                id,
                GateState::AwaitingReview,
                GateState::Escalated,
                Severity::Warning,
                format!(
                    "task {} unreviewed for over {}s; a human decision is still required",
                    task_id, window
                ),
            );
        }
        escalated.into_iter().map(|(id, _, _)| id).collect()
    }

    // ─────────────────────────────────────────────────────────────
    // Suspension and Abort
    // ─────────────────────────────────────────────────────────────

    pub fn suspend(&self, run: &mut WorkflowRun, now: DateTime<Utc>) -> Result<()> {
        if run.status != RunStatus::Running {
            return Err(Error::invalid_state(
                &run.id,
                format!("cannot suspend a run that is {}", run.status),
            ));
        }
        run.status = RunStatus::Suspended;
        let id = run.id.clone();
        run.record(now, &id, RunStatus::Running, RunStatus::Suspended, Severity::Info, "run suspended");
        info!(run = %id, "Run suspended");
        Ok(())
    }

    pub fn resume(&self, run: &mut WorkflowRun, now: DateTime<Utc>) -> Result<Vec<String>> {
        if run.status != RunStatus::Suspended {
            return Err(Error::invalid_state(
                &run.id,
                format!("cannot resume a run that is {}", run.status),
            ));
        }
        run.status = RunStatus::Running;
        let id = run.id.clone();
        run.record(now, &id, RunStatus::Suspended, RunStatus::Running, Severity::Info, "run resumed");
        info!(run = %id, "Run resumed");
        self.advance(run, now)
    }

    /// Abort one task and every dependent not yet approved. The run becomes
    /// ABORTED, so the remaining live tasks are aborted with it.
    pub fn abort_task(
        &self,
        run: &mut WorkflowRun,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        ensure_not_terminal(run)?;
        let task = run.task(task_id)?;
        if task.status.is_terminal() {
            return Err(Error::invalid_state(
                task_id,
                format!("task is already {}", task.status),
            ));
        }

        let graph = build_graph(run)?;
        let mut targets = graph.transitive_dependents(task_id);
        targets.insert(task_id.to_string());
        let mut aborted = self.abort_tasks(run, targets, now);
        let rest: BTreeSet<String> = run.tasks.keys().cloned().collect();
        aborted.extend(self.abort_tasks(run, rest, now));
        self.mark_aborted(run, &format!("task {} aborted", task_id), now);
        Ok(aborted)
    }

    /// Abort every task not yet approved
    pub fn abort_run(&self, run: &mut WorkflowRun, now: DateTime<Utc>) -> Result<Vec<String>> {
        ensure_not_terminal(run)?;
        let targets: BTreeSet<String> = run.tasks.keys().cloned().collect();
        let aborted = self.abort_tasks(run, targets, now);
        self.mark_aborted(run, "run aborted", now);
        Ok(aborted)
    }

    fn abort_tasks(
        &self,
        run: &mut WorkflowRun,
        targets: BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let mut aborted = Vec::new();
        for id in targets {
            let Some(task) = run.tasks.get_mut(&id) else {
                continue;
            };
            if task.status.is_terminal() {
                continue;
            }
            let from = task.status;
            task.status = TaskStatus::Aborted;
            task.updated_at = now;
            let open = task.checkpoint_id.clone();
            run.record(now, &id, from, TaskStatus::Aborted, Severity::Info, "task aborted");

            if let Some(mut ckpt) = open.and_then(|c| run.checkpoints.remove(&c)) {
                ckpt.withdrawn_at = Some(now);
                run.record(now, &ckpt.id, ckpt.state, ckpt.state, Severity::Info, "checkpoint withdrawn");
                run.archived.push(ckpt);
            }
            aborted.push(id);
        }
        aborted
    }

    fn mark_aborted(&self, run: &mut WorkflowRun, message: &str, now: DateTime<Utc>) {
        let from = run.status;
        run.status = RunStatus::Aborted;
        let id = run.id.clone();
        run.record(now, &id, from, RunStatus::Aborted, Severity::Info, message);
        info!(run = %id, "Run aborted");
    }

    /// Mark the run completed once every task is approved
    fn refresh_status(&self, run: &mut WorkflowRun, now: DateTime<Utc>) {
        let done = !run.tasks.is_empty()
            && run.tasks.values().all(|t| t.status == TaskStatus::Approved);
        if run.status == RunStatus::Running && done {
            run.status = RunStatus::Completed;
            let id = run.id.clone();
            run.record(now, &id, RunStatus::Running, RunStatus::Completed, Severity::Info, "all tasks approved");
            info!(run = %id, "Run completed");
        }
    }

    /// Tasks in dependency order, for reporting
    pub fn topological_order(&self, run: &WorkflowRun) -> Vec<String> {
        topological_ids(run)
    }
}

// ─────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────

fn ensure_running(run: &WorkflowRun) -> Result<()> {
    if run.status != RunStatus::Running {
        return Err(Error::invalid_state(
            &run.id,
            format!("run is {}", run.status),
        ));
    }
    Ok(())
}

fn ensure_not_terminal(run: &WorkflowRun) -> Result<()> {
    if run.status.is_terminal() {
        return Err(Error::invalid_state(
            &run.id,
            format!("run is already {}", run.status),
        ));
    }
    Ok(())
}

fn open_checkpoint<'r>(run: &'r WorkflowRun, id: &str) -> Result<&'r Checkpoint> {
    if let Some(ckpt) = run.checkpoints.get(id) {
        return Ok(ckpt);
    }
    match run.find_checkpoint(id) {
        Some(ckpt) if ckpt.withdrawn_at.is_some() => {
            Err(Error::invalid_state(id, "checkpoint was withdrawn"))
        }
        Some(ckpt) => Err(Error::invalid_state(
            id,
            format!("checkpoint already {}", ckpt.state),
        )),
        None => Err(Error::not_found("checkpoint", id)),
    }
}

fn build_graph(run: &WorkflowRun) -> Result<TaskGraph> {
    TaskGraph::build(run.tasks.values().map(|t| (t.id.as_str(), &t.depends_on)))
}

fn topological_ids(run: &WorkflowRun) -> Vec<String> {
    match build_graph(run) {
        Ok(graph) => graph.topological_order(),
        Err(_) => run.tasks.keys().cloned().collect(),
    }
}

/// Journal every gate edge a freshly opened checkpoint took
fn record_gate_path(run: &mut WorkflowRun, ckpt: &Checkpoint, now: DateTime<Utc>) {
    for edge in &ckpt.history {
        let message = match edge.to {
            GateState::Validating => format!("validating artifact for {}", ckpt.task_id),
            GateState::Rejected => format!(
                "validation failed: {}",
                ckpt.rejection_reason.as_deref().unwrap_or("")
            ),
            _ => "awaiting human review".to_string(),
        };
        run.record(now, &ckpt.id, edge.from, edge.to, Severity::Info, message);
    }
}
