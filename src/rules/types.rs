//! Rule definitions and the `Rule` trait.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─────────────────────────────────────────────────────────────────
// Evaluation Inputs and Outputs
// ─────────────────────────────────────────────────────────────────

/// What a rule may know about the task that produced the artifact
#[derive(Debug, Clone, Copy)]
pub struct TaskContext<'a> {
    pub run_id: &'a str,
    pub task_id: &'a str,
    pub description: &'a str,
    pub required_tags: &'a BTreeSet<String>,
    pub capability_id: Option<&'a str>,
}

/// Result of one rule against one artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub rule: String,
    pub passed: bool,
    pub message: String,
}

impl RuleOutcome {
    pub fn pass(rule: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            passed: true,
            message: String::new(),
        }
    }

    pub fn fail(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            passed: false,
            message: message.into(),
        }
    }
}

/// A named predicate over (artifact, task context).
///
/// Declarative rules from a rule-set file implement this, and so can
/// deployment-specific checks registered in code.
pub trait Rule: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this rule is evaluated for the given task at all
    fn applies(&self, _ctx: &TaskContext<'_>) -> bool {
        true
    }

    fn evaluate(&self, artifact: &Value, ctx: &TaskContext<'_>) -> RuleOutcome;
}

// ─────────────────────────────────────────────────────────────────
// Rule-Set File Format
// ─────────────────────────────────────────────────────────────────

/// Top level of a rule-set TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSetFile {
    /// Overrides `engine.escalation_window_secs` for this deployment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_window_secs: Option<u64>,

    #[serde(default, rename = "rule")]
    pub rules: Vec<RuleDefinition>,
}

/// One `[[rule]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub name: String,

    #[serde(flatten)]
    pub kind: RuleKind,

    /// Reported verbatim as the rejection reason when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Only evaluate for tasks whose required tags include all of these
    #[serde(default)]
    pub applies_to: BTreeSet<String>,
}

/// Built-in declarative check kinds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RuleKind {
    /// Every string at `field` must match `pattern`
    NamingConvention { field: String, pattern: String },

    /// `field` must be present, non-null and non-empty
    RequiredField { field: String },

    /// No string at `field` (or anywhere, if unset) may match `pattern`
    ForbiddenPattern {
        pattern: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },
}

impl RuleKind {
    pub fn slug(&self) -> &'static str {
        match self {
            RuleKind::NamingConvention { .. } => "naming-convention",
            RuleKind::RequiredField { .. } => "required-field",
            RuleKind::ForbiddenPattern { .. } => "forbidden-pattern",
        }
    }
}
