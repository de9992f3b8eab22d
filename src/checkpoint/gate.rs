//! The checkpoint gate: sole writer of checkpoint decisions.
//!
//! ```text
//! NO_CHECKPOINT → VALIDATING ─┬─ any rule fails ──────────→ REJECTED
//!                             └─ all pass → AWAITING_REVIEW ─┬─ approve → APPROVED
//!                                              ▲             ├─ reject  → REJECTED
//!                                              │             └─ window  → ESCALATED
//!                                              └──── claim ─────────────────┘
//! ```
//!
//! Escalated checkpoints still take approve/reject directly. A rejected
//! checkpoint is archived; resubmitted work opens a fresh one.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::rules::{RuleValidator, TaskContext};

use super::types::{Checkpoint, GateState, Verdict};

pub struct CheckpointGate {
    validator: RuleValidator,
    escalation_window_secs: u64,
}

impl CheckpointGate {
    /// `escalation_window_secs` is the deployment default; a rule set may override it
    pub fn new(validator: RuleValidator, escalation_window_secs: u64) -> Self {
        let window = validator
            .rules()
            .escalation_window_secs()
            .unwrap_or(escalation_window_secs);
        Self {
            validator,
            escalation_window_secs: window,
        }
    }

    pub fn escalation_window_secs(&self) -> u64 {
        self.escalation_window_secs
    }

    /// Open a checkpoint for a freshly produced artifact and validate it.
    ///
    /// The result is either `AWAITING_REVIEW` or, when any rule fails,
    /// `REJECTED` with the first failing rule's message as reason.
    pub fn open(&self, ctx: &TaskContext<'_>, artifact: &Value, now: DateTime<Utc>) -> Checkpoint {
        let mut ckpt = Checkpoint::new(ctx.run_id, ctx.task_id, self.escalation_window_secs, now);
        ckpt.transition(GateState::Validating, now);

        let report = self.validator.validate(artifact, ctx);
        let failure = report.first_failure().map(|f| f.message.clone());
        ckpt.validation = report;

        match failure {
            Some(reason) => {
                warn!(
                    run = %ctx.run_id,
                    task = %ctx.task_id,
                    checkpoint = %ckpt.id,
                    reason = %reason,
                    "Artifact failed validation"
                );
                ckpt.rejection_reason = Some(reason);
                ckpt.decided_at = Some(now);
                ckpt.transition(GateState::Rejected, now);
            }
            None => {
                info!(
                    run = %ctx.run_id,
                    task = %ctx.task_id,
                    checkpoint = %ckpt.id,
                    "Artifact awaiting review"
                );
                ckpt.review_since = Some(now);
                ckpt.transition(GateState::AwaitingReview, now);
            }
        }
        ckpt
    }

    /// Apply a human decision. Illegal transitions change nothing.
    pub fn decide(
        &self,
        ckpt: &mut Checkpoint,
        verdict: Verdict,
        reviewer: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        ensure_open(ckpt)?;
        if !ckpt.state.accepts_decision() {
            return Err(Error::invalid_state(
                &ckpt.id,
                format!("cannot decide a checkpoint in state {}", ckpt.state),
            ));
        }
        if let Some(name) = reviewer {
            check_reviewer(ckpt, name)?;
        }

        let to = match verdict {
            Verdict::Approve => GateState::Approved,
            Verdict::Reject { reason } => {
                if reason.trim().is_empty() {
                    return Err(Error::validation(&ckpt.id, "a rejection needs a reason"));
                }
                ckpt.rejection_reason = Some(reason);
                GateState::Rejected
            }
        };

        if let Some(name) = reviewer {
            ckpt.reviewer = Some(name.to_string());
        }
        ckpt.decided_at = Some(now);
        ckpt.transition(to, now);
        info!(
            checkpoint = %ckpt.id,
            task = %ckpt.task_id,
            decision = %to,
            reviewer = ?ckpt.reviewer,
            "Checkpoint decided"
        );
        Ok(())
    }

    /// Record reviewer identity. Claiming an escalated checkpoint puts it
    /// back into review without re-arming escalation.
    pub fn claim(&self, ckpt: &mut Checkpoint, reviewer: &str, now: DateTime<Utc>) -> Result<()> {
        ensure_open(ckpt)?;
        if !ckpt.state.accepts_decision() {
            return Err(Error::invalid_state(
                &ckpt.id,
                format!("cannot claim a checkpoint in state {}", ckpt.state),
            ));
        }
        if reviewer.trim().is_empty() {
            return Err(Error::validation(&ckpt.id, "reviewer must not be empty"));
        }
        check_reviewer(ckpt, reviewer)?;

        ckpt.reviewer = Some(reviewer.to_string());
        if ckpt.state == GateState::Escalated {
            ckpt.review_since = Some(now);
            ckpt.transition(GateState::AwaitingReview, now);
        }
        info!(checkpoint = %ckpt.id, reviewer = %reviewer, "Checkpoint claimed");
        Ok(())
    }

    /// Escalate an unattended checkpoint. Fires at most once per checkpoint.
    pub fn escalate_if_overdue(&self, ckpt: &mut Checkpoint, now: DateTime<Utc>) -> bool {
        if ckpt.withdrawn_at.is_some() || !ckpt.is_overdue(now) {
            return false;
        }
        ckpt.escalated_at = Some(now);
        ckpt.transition(GateState::Escalated, now);
        warn!(
            checkpoint = %ckpt.id,
            run = %ckpt.run_id,
            task = %ckpt.task_id,
            window_secs = ckpt.escalation_window_secs,
            "Checkpoint escalated"
        );
        true
    }
}

fn ensure_open(ckpt: &Checkpoint) -> Result<()> {
    if ckpt.withdrawn_at.is_some() {
        return Err(Error::invalid_state(&ckpt.id, "checkpoint was withdrawn"));
    }
    if ckpt.state.is_decided() {
        return Err(Error::invalid_state(
            &ckpt.id,
            format!("checkpoint already {}", ckpt.state),
        ));
    }
    Ok(())
}

fn check_reviewer(ckpt: &Checkpoint, reviewer: &str) -> Result<()> {
    match ckpt.reviewer.as_deref() {
        Some(current) if current != reviewer => Err(Error::invalid_state(
            &ckpt.id,
            format!("already claimed by {}", current),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::rules::{RuleSet, RuleSetFile};
    use chrono::Duration;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn gate_with(rules_toml: &str, window: u64) -> CheckpointGate {
        let file: RuleSetFile = toml::from_str(rules_toml).unwrap();
        let rules = RuleSet::from_file(file).unwrap();
        CheckpointGate::new(RuleValidator::new(Arc::new(rules)), window)
    }

    fn ctx(tags: &BTreeSet<String>) -> TaskContext<'_> {
        TaskContext {
            run_id: "run-1",
            task_id: "t1",
            description: "",
            required_tags: tags,
            capability_id: Some("coder"),
        }
    }

    const NAMING: &str = r#"
[[rule]]
name = "snake-case"
kind = "naming-convention"
field = "module"
pattern = "^[a-z_]+$"
message = "module must be snake_case"
"#;

    #[test]
    fn test_failing_rule_rejects_before_review() {
        let gate = gate_with(NAMING, 60);
        let tags = BTreeSet::new();
        let ckpt = gate.open(&ctx(&tags), &json!({"module": "TaskGraph"}), Utc::now());

        assert_eq!(ckpt.state, GateState::Rejected);
        assert_eq!(
            ckpt.rejection_reason.as_deref(),
            Some("module must be snake_case")
        );
        assert!(ckpt
            .history
            .iter()
            .all(|t| t.to != GateState::AwaitingReview));
    }

    #[test]
    fn test_approve_only_after_clean_validation() {
        let gate = gate_with(NAMING, 60);
        let tags = BTreeSet::new();
        let now = Utc::now();
        let mut ckpt = gate.open(&ctx(&tags), &json!({"module": "task_graph"}), now);
        assert_eq!(ckpt.state, GateState::AwaitingReview);

        gate.decide(&mut ckpt, Verdict::Approve, Some("ana"), now).unwrap();
        assert_eq!(ckpt.state, GateState::Approved);
        assert_eq!(ckpt.reviewer.as_deref(), Some("ana"));

        let states: Vec<GateState> = ckpt.history.iter().map(|t| t.to).collect();
        assert_eq!(
            states,
            vec![GateState::Validating, GateState::AwaitingReview, GateState::Approved]
        );
    }

    #[test]
    fn test_double_decision_is_invalid_state() {
        let gate = gate_with("", 60);
        let tags = BTreeSet::new();
        let now = Utc::now();
        let mut ckpt = gate.open(&ctx(&tags), &json!({}), now);
        gate.decide(&mut ckpt, Verdict::Approve, None, now).unwrap();

        let before = ckpt.clone();
        let err = gate.decide(&mut ckpt, Verdict::Approve, None, now).unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
        assert_eq!(ckpt, before);
    }

    #[test]
    fn test_reject_requires_reason() {
        let gate = gate_with("", 60);
        let tags = BTreeSet::new();
        let now = Utc::now();
        let mut ckpt = gate.open(&ctx(&tags), &json!({}), now);

        let err = gate
            .decide(&mut ckpt, Verdict::Reject { reason: " ".into() }, None, now)
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert_eq!(ckpt.state, GateState::AwaitingReview);

        gate.decide(
            &mut ckpt,
            Verdict::Reject {
                reason: "needs more detail".into(),
            },
            None,
            now,
        )
        .unwrap();
        assert_eq!(ckpt.rejection_reason.as_deref(), Some("needs more detail"));
    }

    #[test]
    fn test_escalates_exactly_once() {
        let clock = ManualClock::new(Utc::now());
        let gate = gate_with("", 30);
        let tags = BTreeSet::new();
        let mut ckpt = gate.open(&ctx(&tags), &json!({}), clock.now());

        clock.advance(Duration::seconds(30));
        assert!(!gate.escalate_if_overdue(&mut ckpt, clock.now()));

        clock.advance(Duration::seconds(1));
        assert!(gate.escalate_if_overdue(&mut ckpt, clock.now()));
        assert_eq!(ckpt.state, GateState::Escalated);

        clock.advance(Duration::seconds(3600));
        assert!(!gate.escalate_if_overdue(&mut ckpt, clock.now()));

        // Claiming brings it back to review without re-arming the timer
        gate.claim(&mut ckpt, "ops", clock.now()).unwrap();
        assert_eq!(ckpt.state, GateState::AwaitingReview);
        clock.advance(Duration::seconds(3600));
        assert!(!gate.escalate_if_overdue(&mut ckpt, clock.now()));

        let escalations = ckpt
            .history
            .iter()
            .filter(|t| t.to == GateState::Escalated)
            .count();
        assert_eq!(escalations, 1);
    }

    #[test]
    fn test_escalated_checkpoint_still_decidable() {
        let clock = ManualClock::new(Utc::now());
        let gate = gate_with("", 1);
        let tags = BTreeSet::new();
        let mut ckpt = gate.open(&ctx(&tags), &json!({}), clock.now());
        clock.advance(Duration::seconds(5));
        assert!(gate.escalate_if_overdue(&mut ckpt, clock.now()));

        gate.decide(&mut ckpt, Verdict::Approve, None, clock.now()).unwrap();
        assert_eq!(ckpt.state, GateState::Approved);
    }

    #[test]
    fn test_claim_conflict() {
        let gate = gate_with("", 60);
        let tags = BTreeSet::new();
        let now = Utc::now();
        let mut ckpt = gate.open(&ctx(&tags), &json!({}), now);

        gate.claim(&mut ckpt, "ana", now).unwrap();
        gate.claim(&mut ckpt, "ana", now).unwrap();
        assert!(gate.claim(&mut ckpt, "bo", now).is_err());
        assert!(gate
            .decide(&mut ckpt, Verdict::Approve, Some("bo"), now)
            .is_err());
    }

    #[test]
    fn test_rule_set_overrides_window() {
        let gate = gate_with("escalation_window_secs = 5\n", 86_400);
        assert_eq!(gate.escalation_window_secs(), 5);
    }
}
