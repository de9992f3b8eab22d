//! Rule validation
//!
//! Artifacts are checked against an ordered rule set before any human
//! sees them. Rules come from a TOML file (naming conventions, required
//! fields, forbidden patterns) or from code through the `Rule` trait.

mod declarative;
mod types;
mod validator;

pub use declarative::{resolve, DeclarativeRule};
pub use types::{Rule, RuleDefinition, RuleKind, RuleOutcome, RuleSetFile, TaskContext};
pub use validator::{RuleSet, RuleValidator, ValidationReport};
