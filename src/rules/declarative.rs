//! Declarative rules compiled from rule-set files.

use std::collections::BTreeSet;

use regex::Regex;
use serde_json::Value;

use crate::error::{Error, Result};

use super::types::{Rule, RuleDefinition, RuleKind, RuleOutcome, TaskContext};

enum Check {
    Naming { field: String, pattern: Regex },
    Required { field: String },
    Forbidden { field: Option<String>, pattern: Regex },
}

/// A rule-set entry with its regex compiled
pub struct DeclarativeRule {
    name: String,
    check: Check,
    message: Option<String>,
    applies_to: BTreeSet<String>,
}

impl DeclarativeRule {
    /// Compile a definition. Bad regexes surface as configuration errors.
    pub fn compile(def: RuleDefinition) -> Result<Self> {
        if def.name.trim().is_empty() {
            return Err(Error::config_field_invalid("rule.name", "rule name cannot be empty"));
        }

        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                Error::config_field_invalid(
                    format!("rule.{}.pattern", def.name),
                    format!("invalid pattern '{}': {}", pattern, e),
                )
            })
        };

        let check = match &def.kind {
            RuleKind::NamingConvention { field, pattern } => Check::Naming {
                field: field.clone(),
                pattern: compile(pattern)?,
            },
            RuleKind::RequiredField { field } => Check::Required {
                field: field.clone(),
            },
            RuleKind::ForbiddenPattern { pattern, field } => Check::Forbidden {
                field: field.clone(),
                pattern: compile(pattern)?,
            },
        };

        Ok(Self {
            name: def.name,
            check,
            message: def.message,
            applies_to: def.applies_to,
        })
    }

    fn fail(&self, detail: String) -> RuleOutcome {
        let message = self.message.clone().unwrap_or(detail);
        RuleOutcome::fail(&self.name, message)
    }
}

impl Rule for DeclarativeRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn applies(&self, ctx: &TaskContext<'_>) -> bool {
        self.applies_to.is_subset(ctx.required_tags)
    }

    fn evaluate(&self, artifact: &Value, _ctx: &TaskContext<'_>) -> RuleOutcome {
        match &self.check {
            Check::Naming { field, pattern } => {
                // Absent field passes; presence is a required-field concern
                let Some(value) = resolve(artifact, field) else {
                    return RuleOutcome::pass(&self.name);
                };
                let mut strings = Vec::new();
                collect_strings(value, &mut strings);
                match strings.into_iter().find(|s| !pattern.is_match(s)) {
                    Some(bad) => self.fail(format!(
                        "'{}' at {} does not match {}",
                        bad,
                        field,
                        pattern.as_str()
                    )),
                    None => RuleOutcome::pass(&self.name),
                }
            }
            Check::Required { field } => match resolve(artifact, field) {
                Some(value) if !is_empty(value) => RuleOutcome::pass(&self.name),
                Some(_) => self.fail(format!("required field {} is empty", field)),
                None => self.fail(format!("required field {} is missing", field)),
            },
            Check::Forbidden { field, pattern } => {
                let scope = match field {
                    Some(path) => match resolve(artifact, path) {
                        Some(value) => value,
                        None => return RuleOutcome::pass(&self.name),
                    },
                    None => artifact,
                };
                let mut strings = Vec::new();
                collect_strings(scope, &mut strings);
                match strings.into_iter().find(|s| pattern.is_match(s)) {
                    Some(hit) => self.fail(format!(
                        "forbidden pattern {} found in '{}'",
                        pattern.as_str(),
                        hit
                    )),
                    None => RuleOutcome::pass(&self.name),
                }
            }
        }
    }
}

/// Resolve a dotted path (`meta.authors.0`) inside a JSON value.
/// Numeric segments index into arrays.
pub fn resolve<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn collect_strings<'v>(value: &'v Value, out: &mut Vec<&'v str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|item| collect_strings(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect_strings(item, out)),
        _ => {}
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
