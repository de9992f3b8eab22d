//! Read-only views of runs for the status and list commands.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::checkpoint::{Decision, GateState};
use crate::workflow::{RunStatus, TaskStatus, WorkflowRun};

/// Checkpoint state attached to a task line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckpointReport {
    pub id: String,
    pub state: GateState,
    pub decision: Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskReport {
    pub id: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    pub depends_on: Vec<String>,
    pub rework_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<CheckpointReport>,
}

/// Full status of one run, tasks in dependency order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub id: String,
    pub goal: String,
    pub status: RunStatus,
    pub sequence: u64,
    pub updated_at: DateTime<Utc>,
    pub tasks: Vec<TaskReport>,
}

impl RunReport {
    pub(crate) fn build(run: &WorkflowRun, order: &[String]) -> Self {
        let tasks = order
            .iter()
            .filter_map(|id| run.tasks.get(id))
            .map(|task| TaskReport {
                id: task.id.clone(),
                status: task.status,
                capability: task.assigned_capability.clone(),
                depends_on: task.depends_on.iter().cloned().collect(),
                rework_count: task.rework_count,
                checkpoint: run.checkpoint_for(&task.id).map(|c| CheckpointReport {
                    id: c.id.clone(),
                    state: c.state,
                    decision: c.decision(),
                    reviewer: c.reviewer.clone(),
                    rejection_reason: c.rejection_reason.clone(),
                }),
            })
            .collect();

        Self {
            id: run.id.clone(),
            goal: run.goal.clone(),
            status: run.status,
            sequence: run.sequence,
            updated_at: run.updated_at,
            tasks,
        }
    }

    pub fn task(&self, id: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run:      {}", self.id)?;
        writeln!(f, "Goal:     {}", self.goal)?;
        writeln!(f, "Status:   {}", self.status)?;
        writeln!(f, "Snapshot: {}", self.sequence)?;
        writeln!(f)?;
        writeln!(
            f,
            "{:<20} {:<22} {:<16} {}",
            "TASK", "STATUS", "CAPABILITY", "CHECKPOINT"
        )?;
        for task in &self.tasks {
            let checkpoint = match &task.checkpoint {
                Some(c) => format!("{} {}", c.id, c.state),
                None => "-".to_string(),
            };
            writeln!(
                f,
                "{:<20} {:<22} {:<16} {}",
                task.id,
                task.status.as_str(),
                task.capability.as_deref().unwrap_or("-"),
                checkpoint
            )?;
            if let Some(reason) = task
                .checkpoint
                .as_ref()
                .and_then(|c| c.rejection_reason.as_deref())
            {
                writeln!(f, "{:<20} rejected: {}", "", reason)?;
            }
        }
        Ok(())
    }
}

/// One line of the run list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub id: String,
    pub goal: String,
    pub status: RunStatus,
    pub sequence: u64,
    pub tasks: usize,
    pub approved: usize,
    pub awaiting_review: usize,
    pub updated_at: DateTime<Utc>,
}

impl RunSummary {
    pub(crate) fn build(run: &WorkflowRun) -> Self {
        Self {
            id: run.id.clone(),
            goal: run.goal.clone(),
            status: run.status,
            sequence: run.sequence,
            tasks: run.tasks.len(),
            approved: run.count_by_status(TaskStatus::Approved),
            awaiting_review: run.checkpoints.len(),
            updated_at: run.updated_at,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}  {:<10} #{:<4} {}/{} approved, {} awaiting review  {}",
            self.id,
            self.status.as_str(),
            self.sequence,
            self.approved,
            self.tasks,
            self.awaiting_review,
            self.goal
        )
    }
}
