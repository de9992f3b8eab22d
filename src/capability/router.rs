//! Delegation router: picks exactly one capability for a task.
//!
//! Selection order:
//! 1. Candidates whose specialization covers the required tags
//! 2. On rework, drop the previous assignee if anyone else qualifies
//! 3. Keep only the most specific candidates (fewest surplus tags)
//! 4. Least recently assigned wins, ties broken by id

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Error, Result};

use super::registry::{Candidate, CapabilityRegistry};
use super::types::Capability;

/// What the router needs to know about a task
#[derive(Debug, Clone, Copy)]
pub struct RoutingRequest<'a> {
    pub task_id: &'a str,
    pub required: &'a BTreeSet<String>,
    /// Assignee of the rejected attempt, when rerouting rework
    pub previous: Option<&'a str>,
}

pub struct DelegationRouter {
    registry: Arc<CapabilityRegistry>,
}

impl DelegationRouter {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self { registry }
    }

    /// Assign the task to exactly one capability and stamp it.
    ///
    /// Returns `NoCapabilityMatch` when nothing covers the required tags.
    /// The scheduler parks the task in that case.
    pub fn assign(&self, request: RoutingRequest<'_>) -> Result<Capability> {
        let no_match = || Error::NoCapabilityMatch {
            task_id: request.task_id.to_string(),
            required: request.required.iter().cloned().collect(),
        };

        let chosen = select(self.registry.candidates(request.required), request.previous)
            .ok_or_else(no_match)?;

        // Deregistered between lookup and stamp
        if !self.registry.mark_assigned(&chosen.id) {
            return Err(no_match());
        }

        info!(
            task = %request.task_id,
            capability = %chosen.id,
            rerouted_from = ?request.previous,
            "Task delegated"
        );
        Ok(chosen)
    }
}

fn select(mut candidates: Vec<Candidate>, previous: Option<&str>) -> Option<Capability> {
    if let Some(prev) = previous {
        if candidates.iter().any(|c| c.capability.id != prev) {
            candidates.retain(|c| c.capability.id != prev);
        } else {
            debug!(capability = %prev, "Previous assignee is the only candidate");
        }
    }

    let best = candidates.iter().map(|c| c.surplus).min()?;
    candidates
        .into_iter()
        .filter(|c| c.surplus == best)
        .min_by(|a, b| {
            a.last_assigned
                .cmp(&b.last_assigned)
                .then_with(|| a.capability.id.cmp(&b.capability.id))
        })
        .map(|c| c.capability)
}
