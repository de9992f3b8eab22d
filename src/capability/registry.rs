//! Capability registry: the process-wide, read-mostly table of workers.
//!
//! Lookups take a read lock; register, deregister and assignment stamps
//! take the write lock. The whole table is serializable so it can be
//! persisted as a single current-state record.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::types::Capability;

/// A capability plus registry bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredCapability {
    pub capability: Capability,
    pub registered_at: DateTime<Utc>,
    /// Registry-wide assignment stamp of the latest assignment (0 = never).
    #[serde(default)]
    pub last_assigned: u64,
}

/// Persisted form of the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryTable {
    pub entries: BTreeMap<String, RegisteredCapability>,
    /// Monotonic counter feeding `last_assigned`.
    #[serde(default)]
    pub assignment_seq: u64,
}

/// What a `register` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Inserted,
    /// Identical descriptor already present.
    Unchanged,
    /// Same id and tags, other fields redeclared.
    Replaced,
}

/// A lookup hit with the data the router ranks on.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub capability: Capability,
    pub surplus: usize,
    pub last_assigned: u64,
}

/// Thread-safe registry of worker capabilities
pub struct CapabilityRegistry {
    table: RwLock<RegistryTable>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::from_table(RegistryTable::default())
    }

    pub fn from_table(table: RegistryTable) -> Self {
        Self {
            table: RwLock::new(table),
        }
    }

    /// Copy of the current table for persistence.
    pub fn table(&self) -> RegistryTable {
        self.table.read().clone()
    }

    /// Current assignment stamp; changes whenever the router assigns
    pub fn assignment_seq(&self) -> u64 {
        self.table.read().assignment_seq
    }

    /// Swap the whole table back, used to undo a change that failed to persist.
    pub fn restore(&self, table: RegistryTable) {
        *self.table.write() = table;
    }

    /// Register a capability.
    ///
    /// Re-registering the same id is idempotent when the descriptor is
    /// identical and replaces it when only non-specialization fields
    /// differ. A different specialization set is a conflict.
    pub fn register(&self, capability: Capability, now: DateTime<Utc>) -> Result<Registration> {
        capability.validate()?;
        let mut table = self.table.write();

        if let Some(existing) = table.entries.get_mut(&capability.id) {
            if existing.capability.specialization != capability.specialization {
                return Err(Error::DuplicateCapability {
                    id: capability.id.clone(),
                    existing: existing.capability.specialization.iter().cloned().collect(),
                    requested: capability.specialization.iter().cloned().collect(),
                });
            }
            if existing.capability == capability {
                debug!(capability = %capability.id, "Capability already registered");
                return Ok(Registration::Unchanged);
            }
            info!(capability = %capability.id, "Capability redeclared");
            existing.capability = capability;
            return Ok(Registration::Replaced);
        }

        info!(
            capability = %capability.id,
            specialization = ?capability.specialization,
            scope = %capability.context_scope,
            "Capability registered"
        );
        table.entries.insert(
            capability.id.clone(),
            RegisteredCapability {
                capability,
                registered_at: now,
                last_assigned: 0,
            },
        );
        Ok(Registration::Inserted)
    }

    /// Remove a capability.
    ///
    /// `active_tasks` lists the non-terminal tasks currently assigned to
    /// `id`; the registry does not own tasks, so the caller supplies them.
    pub fn deregister(&self, id: &str, active_tasks: Vec<String>) -> Result<Capability> {
        if !active_tasks.is_empty() {
            return Err(Error::CapabilityInUse {
                id: id.to_string(),
                tasks: active_tasks,
            });
        }
        let removed = self
            .table
            .write()
            .entries
            .remove(id)
            .ok_or_else(|| Error::not_found("capability", id))?;
        info!(capability = %id, "Capability deregistered");
        Ok(removed.capability)
    }

    /// Capabilities whose specializations cover `required`, most specific
    /// first, ties broken by id.
    pub fn lookup(&self, required: &BTreeSet<String>) -> Vec<Capability> {
        self.candidates(required)
            .into_iter()
            .map(|c| c.capability)
            .collect()
    }

    /// Same ordering as `lookup`, with ranking data attached.
    pub fn candidates(&self, required: &BTreeSet<String>) -> Vec<Candidate> {
        let table = self.table.read();
        let mut hits: Vec<Candidate> = table
            .entries
            .values()
            .filter(|entry| entry.capability.covers(required))
            .map(|entry| Candidate {
                surplus: entry.capability.surplus(required),
                last_assigned: entry.last_assigned,
                capability: entry.capability.clone(),
            })
            .collect();
        hits.sort_by(|a, b| {
            a.surplus
                .cmp(&b.surplus)
                .then_with(|| a.capability.id.cmp(&b.capability.id))
        });
        hits
    }

    /// Stamp an assignment for least-recently-used balancing.
    /// Returns false if the capability vanished in the meantime.
    pub fn mark_assigned(&self, id: &str) -> bool {
        let mut table = self.table.write();
        let stamp = table.assignment_seq + 1;
        match table.entries.get_mut(id) {
            Some(entry) => {
                entry.last_assigned = stamp;
                table.assignment_seq = stamp;
                true
            }
            None => false,
        }
    }

    /// All registered entries in id order
    pub fn list(&self) -> Vec<RegisteredCapability> {
        self.table.read().entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.table.read().entries.len()
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
