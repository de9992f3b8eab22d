//! Rule sets and the validator that runs them.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::declarative::DeclarativeRule;
use super::types::{Rule, RuleOutcome, RuleSetFile, TaskContext};

/// Ordered, read-only collection of rules
#[derive(Default)]
pub struct RuleSet {
    rules: Vec<Box<dyn Rule>>,
    escalation_window_secs: Option<u64>,
}

impl RuleSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a rule-set TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::IoRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let file: RuleSetFile =
            toml::from_str(&content).map_err(|e| Error::config_parse(path, e.to_string()))?;
        let set = Self::from_file(file)?;
        info!(path = %path.display(), rules = set.len(), "Rule set loaded");
        Ok(set)
    }

    pub fn from_file(file: RuleSetFile) -> Result<Self> {
        if file.escalation_window_secs == Some(0) {
            return Err(Error::config_field_invalid(
                "escalation_window_secs",
                "escalation window must be greater than zero",
            ));
        }

        let mut set = Self {
            rules: Vec::with_capacity(file.rules.len()),
            escalation_window_secs: file.escalation_window_secs,
        };
        for def in file.rules {
            if set.rules.iter().any(|r| r.name() == def.name) {
                return Err(Error::config_field_invalid(
                    "rule.name",
                    format!("duplicate rule name '{}'", def.name),
                ));
            }
            set.rules.push(Box::new(DeclarativeRule::compile(def)?));
        }
        Ok(set)
    }

    /// Append a programmatic rule after the declarative ones
    pub fn push(&mut self, rule: impl Rule + 'static) {
        self.rules.push(Box::new(rule));
    }

    pub fn escalation_window_secs(&self) -> Option<u64> {
        self.escalation_window_secs
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Every outcome of one validation pass, in rule order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub results: Vec<RuleOutcome>,
    /// Rules skipped because their `applies_to` tags did not match
    #[serde(default)]
    pub skipped: Vec<String>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &RuleOutcome> {
        self.results.iter().filter(|r| !r.passed)
    }

    pub fn first_failure(&self) -> Option<&RuleOutcome> {
        self.failures().next()
    }
}

/// Runs a rule set against artifacts. Stateless apart from the shared rules.
#[derive(Clone)]
pub struct RuleValidator {
    rules: Arc<RuleSet>,
}

impl RuleValidator {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Evaluate every applicable rule. All rules run so the report is complete.
    pub fn validate(&self, artifact: &Value, ctx: &TaskContext<'_>) -> ValidationReport {
        let mut report = ValidationReport::default();
        for rule in &self.rules.rules {
            if !rule.applies(ctx) {
                report.skipped.push(rule.name().to_string());
                continue;
            }
            let outcome = rule.evaluate(artifact, ctx);
            debug!(
                run = %ctx.run_id,
                task = %ctx.task_id,
                rule = %outcome.rule,
                passed = outcome.passed,
                "Rule evaluated"
            );
            report.results.push(outcome);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    struct MaxLines(usize);

    impl Rule for MaxLines {
        fn name(&self) -> &str {
            "max-lines"
        }

        fn evaluate(&self, artifact: &Value, _ctx: &TaskContext<'_>) -> RuleOutcome {
            let lines = artifact["lines"].as_array().map(Vec::len).unwrap_or(0);
            if lines <= self.0 {
                RuleOutcome::pass(self.name())
            } else {
                RuleOutcome::fail(self.name(), format!("{} lines exceeds {}", lines, self.0))
            }
        }
    }

    fn ctx(tags: &BTreeSet<String>) -> TaskContext<'_> {
        TaskContext {
            run_id: "run-1",
            task_id: "t1",
            description: "",
            required_tags: tags,
            capability_id: None,
        }
    }

    fn load(content: &str) -> Result<RuleSet> {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("rules.toml");
        fs::write(&path, content).unwrap();
        RuleSet::load(&path)
    }

    #[test]
    fn test_first_failure_follows_rule_order() {
        let set = load(
            r#"
[[rule]]
name = "summary"
kind = "required-field"
field = "summary"
message = "summary is required"

[[rule]]
name = "no-todo"
kind = "forbidden-pattern"
pattern = "TODO"
"#,
        )
        .unwrap();
        let validator = RuleValidator::new(Arc::new(set));
        let tags = BTreeSet::new();

        let report = validator.validate(&json!({"body": "TODO"}), &ctx(&tags));
        assert!(!report.passed());
        assert_eq!(report.failures().count(), 2);
        assert_eq!(report.first_failure().unwrap().message, "summary is required");
    }

    #[test]
    fn test_programmatic_rule_mixes_in() {
        let mut set = RuleSet::empty();
        set.push(MaxLines(2));
        let validator = RuleValidator::new(Arc::new(set));
        let tags = BTreeSet::new();

        assert!(validator.validate(&json!({"lines": [1, 2]}), &ctx(&tags)).passed());
        let report = validator.validate(&json!({"lines": [1, 2, 3]}), &ctx(&tags));
        assert_eq!(report.first_failure().unwrap().rule, "max-lines");
    }

    #[test]
    fn test_skipped_rules_recorded() {
        let set = load(
            "[[rule]]\nname = \"docs\"\nkind = \"required-field\"\nfield = \"summary\"\napplies_to = [\"docs\"]\n",
        )
        .unwrap();
        let validator = RuleValidator::new(Arc::new(set));
        let tags = BTreeSet::new();

        let report = validator.validate(&json!({}), &ctx(&tags));
        assert!(report.passed());
        assert_eq!(report.skipped, vec!["docs".to_string()]);
    }

    #[test]
    fn test_duplicate_rule_names_rejected() {
        let result = load(
            "[[rule]]\nname = \"a\"\nkind = \"required-field\"\nfield = \"x\"\n\n[[rule]]\nname = \"a\"\nkind = \"required-field\"\nfield = \"y\"\n",
        );
        assert!(matches!(result, Err(Error::ConfigValidation { .. })));
    }

    #[test]
    fn test_escalation_override() {
        let set = load("escalation_window_secs = 90\n").unwrap();
        assert_eq!(set.escalation_window_secs(), Some(90));
        assert!(set.is_empty());
    }
}
