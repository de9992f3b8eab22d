//! Core types for the capability system.
//!
//! A capability is the declared profile of one worker persona: which
//! specializations it covers, which integration surfaces it can work
//! against, and how much of a project it can hold in context. The
//! persona's prose body rides along as an opaque `brief`.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// Context Scope
// ─────────────────────────────────────────────────────────────────

/// How much of a codebase a worker can reason about at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContextScope {
    /// Works inside a single file.
    SingleFile,
    /// Works across one module or package.
    Module,
    /// Works across the whole project.
    ProjectWide,
}

impl ContextScope {
    /// Slug used in descriptor files and CLI output.
    pub fn slug(&self) -> &'static str {
        match self {
            ContextScope::SingleFile => "single-file",
            ContextScope::Module => "module",
            ContextScope::ProjectWide => "project-wide",
        }
    }
}

impl fmt::Display for ContextScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for ContextScope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single-file" | "single_file" | "file" => Ok(ContextScope::SingleFile),
            "module" => Ok(ContextScope::Module),
            "project-wide" | "project_wide" | "project" => Ok(ContextScope::ProjectWide),
            _ => Err(format!(
                "Unknown context scope '{}'. Valid: single-file, module, project-wide",
                s
            )),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Capability
// ─────────────────────────────────────────────────────────────────

/// A registered worker profile, deserialized from a descriptor TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// Unique id across the registry.
    pub id: String,

    /// Specialization tags matched against a task's required tags.
    pub specialization: BTreeSet<String>,

    /// Integration surfaces this worker is compatible with.
    #[serde(default)]
    pub compatible_surfaces: BTreeSet<String>,

    /// Context the worker can hold.
    pub context_scope: ContextScope,

    /// Persona body handed to the worker on assignment. Never interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brief: Option<String>,
}

impl Capability {
    pub fn new<I, S>(id: impl Into<String>, specialization: I, context_scope: ContextScope) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            specialization: specialization.into_iter().map(Into::into).collect(),
            compatible_surfaces: BTreeSet::new(),
            context_scope,
            brief: None,
        }
    }

    pub fn with_surfaces<I, S>(mut self, surfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.compatible_surfaces = surfaces.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_brief(mut self, brief: impl Into<String>) -> Self {
        self.brief = Some(brief.into());
        self
    }

    /// True when every required tag is among this capability's specializations.
    pub fn covers(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.specialization)
    }

    /// Specializations beyond the requested ones. Fewer means a tighter fit.
    pub fn surplus(&self, required: &BTreeSet<String>) -> usize {
        self.specialization.difference(required).count()
    }

    /// Reject descriptors the registry cannot match against.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::validation("<capability>", "id must not be empty"));
        }
        if self.specialization.is_empty() {
            return Err(Error::validation(
                &self.id,
                "specialization must list at least one tag",
            ));
        }
        let blank = self
            .specialization
            .iter()
            .chain(self.compatible_surfaces.iter())
            .any(|tag| tag.trim().is_empty());
        if blank {
            return Err(Error::validation(&self.id, "tags must not be blank"));
        }
        Ok(())
    }

    /// Load and validate a descriptor file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::IoRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let capability: Capability =
            toml::from_str(&content).map_err(|e| Error::config_parse(path, e.to_string()))?;
        capability.validate()?;
        Ok(capability)
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
