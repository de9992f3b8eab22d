//! Checkpoint records and gate states.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rules::ValidationReport;

// ─────────────────────────────────────────────────────────────────
// Gate State
// ─────────────────────────────────────────────────────────────────

/// Position of a checkpoint in the approval state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateState {
    /// No artifact yet
    NoCheckpoint,
    /// Rule validator running
    Validating,
    /// Waiting for a human decision
    AwaitingReview,
    /// Human approved; terminal for this checkpoint
    Approved,
    /// Failed validation or human rejection
    Rejected,
    /// Unattended past its window; still needs a human decision
    Escalated,
}

impl GateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateState::NoCheckpoint => "NO_CHECKPOINT",
            GateState::Validating => "VALIDATING",
            GateState::AwaitingReview => "AWAITING_REVIEW",
            GateState::Approved => "APPROVED",
            GateState::Rejected => "REJECTED",
            GateState::Escalated => "ESCALATED",
        }
    }

    /// States in which a human decision is accepted
    pub fn accepts_decision(&self) -> bool {
        matches!(self, GateState::AwaitingReview | GateState::Escalated)
    }

    /// Whether a decision has been reached
    pub fn is_decided(&self) -> bool {
        matches!(self, GateState::Approved | GateState::Rejected)
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Pending,
    Approved,
    Rejected,
    Escalated,
}

impl From<GateState> for Decision {
    fn from(state: GateState) -> Self {
        match state {
            GateState::Approved => Decision::Approved,
            GateState::Rejected => Decision::Rejected,
            GateState::Escalated => Decision::Escalated,
            GateState::NoCheckpoint | GateState::Validating | GateState::AwaitingReview => {
                Decision::Pending
            }
        }
    }
}

/// A human verdict on an artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Approve,
    Reject { reason: String },
}

// ─────────────────────────────────────────────────────────────────
// Checkpoint
// ─────────────────────────────────────────────────────────────────

/// One edge taken through the gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateTransition {
    pub from: GateState,
    pub to: GateState,
    pub at: DateTime<Utc>,
}

/// Approval record for one artifact of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub run_id: String,
    pub task_id: String,
    pub state: GateState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<String>,

    pub opened_at: DateTime<Utc>,

    /// Start of the current review wait
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_since: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalated_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,

    /// Set when the owning task was aborted while the checkpoint was open
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub withdrawn_at: Option<DateTime<Utc>>,

    pub escalation_window_secs: u64,

    #[serde(default)]
    pub validation: ValidationReport,

    #[serde(default)]
    pub history: Vec<GateTransition>,
}

impl Checkpoint {
    pub fn new(
        run_id: impl Into<String>,
        task_id: impl Into<String>,
        escalation_window_secs: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("ckpt-{}", Uuid::new_v4().simple()),
            run_id: run_id.into(),
            task_id: task_id.into(),
            state: GateState::NoCheckpoint,
            reviewer: None,
            opened_at: now,
            review_since: None,
            decided_at: None,
            escalated_at: None,
            rejection_reason: None,
            withdrawn_at: None,
            escalation_window_secs,
            validation: ValidationReport::default(),
            history: Vec::new(),
        }
    }

    pub fn decision(&self) -> Decision {
        self.state.into()
    }

    /// Move to `to`, recording the edge
    pub(crate) fn transition(&mut self, to: GateState, now: DateTime<Utc>) {
        self.history.push(GateTransition {
            from: self.state,
            to,
            at: now,
        });
        self.state = to;
    }

    /// Pending for longer than its window and never escalated before
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        if self.state != GateState::AwaitingReview || self.escalated_at.is_some() {
            return false;
        }
        let Some(since) = self.review_since else {
            return false;
        };
        let window_ms = i64::try_from(self.escalation_window_secs)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        now.signed_duration_since(since).num_milliseconds() > window_ms
    }

}
