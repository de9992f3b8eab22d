//! Task and workflow run data model.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::checkpoint::Checkpoint;
use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// Task
// ─────────────────────────────────────────────────────────────────

/// Lifecycle of a task inside a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Admitted, dependencies not yet approved
    Pending,
    /// Ready but no capability matches; retried on registry change
    BlockedNoCapability,
    /// Assigned and being worked on (or reworked)
    InProgress,
    /// Artifact produced, checkpoint awaiting a human
    UnderReview,
    Approved,
    Aborted,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::BlockedNoCapability => "BLOCKED_NO_CAPABILITY",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::UnderReview => "UNDER_REVIEW",
            TaskStatus::Approved => "APPROVED",
            TaskStatus::Aborted => "ABORTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Approved | TaskStatus::Aborted)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work inside a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Opaque instructions for the worker
    pub description: String,
    #[serde(default)]
    pub payload: Value,
    pub required_tags: BTreeSet<String>,
    pub depends_on: BTreeSet<String>,
    /// Task that emitted this one as a sub-task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_capability: Option<String>,
    /// Persona brief handed over with the assignment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brief: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
    /// Rejections survived so far
    #[serde(default)]
    pub rework_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn from_spec(spec: TaskSpec, now: DateTime<Utc>) -> Self {
        Self {
            id: spec.id,
            description: spec.description,
            payload: spec.payload.unwrap_or(Value::Null),
            required_tags: spec.requires,
            depends_on: spec.depends_on,
            parent: spec.parent,
            status: TaskStatus::Pending,
            assigned_capability: None,
            brief: None,
            artifact: None,
            checkpoint_id: None,
            rework_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Goal Documents
// ─────────────────────────────────────────────────────────────────

/// One `[[task]]` entry of a goal or sub-task file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requires: BTreeSet<String>,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl TaskSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            requires: BTreeSet::new(),
            depends_on: BTreeSet::new(),
            payload: None,
            parent: None,
        }
    }

    pub fn requires<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = ids.into_iter().map(Into::into).collect();
        self
    }
}

/// A decomposed goal: description plus its task batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "task")]
    pub tasks: Vec<TaskSpec>,
}

impl Goal {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::IoRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| Error::config_parse(path, e.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────
// Workflow Run
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Suspended,
    Completed,
    Aborted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Suspended => "SUSPENDED",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Aborted => "ABORTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Aborted)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification weight of a journal entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    /// Needs outside remediation (e.g. register a capability)
    Notice,
    /// Escalation
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Notice => write!(f, "notice"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// One state change in a run's journal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub seq: u64,
    pub at: DateTime<Utc>,
    /// Run, task or checkpoint id
    pub subject: String,
    pub from: String,
    pub to: String,
    pub severity: Severity,
    pub message: String,
}

/// One execution of a decomposed goal. Owns its tasks and checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: String,
    pub goal: String,
    pub status: RunStatus,
    pub tasks: BTreeMap<String, Task>,
    /// Open checkpoints by id
    #[serde(default)]
    pub checkpoints: BTreeMap<String, Checkpoint>,
    /// Decided or withdrawn checkpoints, oldest first
    #[serde(default)]
    pub archived: Vec<Checkpoint>,
    #[serde(default)]
    pub journal: Vec<TransitionRecord>,
    /// Sequence of the snapshot this state was last persisted at
    #[serde(default)]
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn new(id: impl Into<String>, goal: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            goal: goal.into(),
            status: RunStatus::Running,
            tasks: BTreeMap::new(),
            checkpoints: BTreeMap::new(),
            archived: Vec::new(),
            journal: Vec::new(),
            sequence: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn task(&self, id: &str) -> Result<&Task> {
        self.tasks.get(id).ok_or_else(|| Error::not_found("task", id))
    }

    pub fn task_mut(&mut self, id: &str) -> Result<&mut Task> {
        self.tasks
            .get_mut(id)
            .ok_or_else(|| Error::not_found("task", id))
    }

    /// Latest checkpoint for a task, open or archived
    pub fn checkpoint_for(&self, task_id: &str) -> Option<&Checkpoint> {
        self.tasks
            .get(task_id)
            .and_then(|t| t.checkpoint_id.as_deref())
            .and_then(|id| self.find_checkpoint(id))
    }

    pub fn find_checkpoint(&self, id: &str) -> Option<&Checkpoint> {
        self.checkpoints
            .get(id)
            .or_else(|| self.archived.iter().rev().find(|c| c.id == id))
    }

    pub fn owns_checkpoint(&self, id: &str) -> bool {
        self.find_checkpoint(id).is_some()
    }

    /// Non-terminal tasks assigned to `capability`, as `run/task`
    pub fn active_assignments(&self, capability: &str) -> Vec<String> {
        self.tasks
            .values()
            .filter(|t| !t.status.is_terminal())
            .filter(|t| t.assigned_capability.as_deref() == Some(capability))
            .map(|t| format!("{}/{}", self.id, t.id))
            .collect()
    }

    pub fn count_by_status(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status == status).count()
    }

    /// Append a journal record
    pub fn record(
        &mut self,
        now: DateTime<Utc>,
        subject: &str,
        from: impl fmt::Display,
        to: impl fmt::Display,
        severity: Severity,
        message: impl Into<String>,
    ) {
        let seq = self.journal.len() as u64 + 1;
        self.journal.push(TransitionRecord {
            seq,
            at: now,
            subject: subject.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            severity,
            message: message.into(),
        });
        self.updated_at = now;
    }
}
