//! Immutable, digest-sealed snapshots of a workflow run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::workflow::WorkflowRun;

/// Full state of one run at one sequence number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub run_id: String,
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    /// Hex SHA-256 of the serialized `state`
    pub digest: String,
    pub state: WorkflowRun,
}

impl ContextSnapshot {
    /// Seal the run's current state at `state.sequence`
    pub fn capture(state: &WorkflowRun, now: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            run_id: state.id.clone(),
            sequence: state.sequence,
            created_at: now,
            digest: digest_of(state)?,
            state: state.clone(),
        })
    }

    /// Check the envelope against its contents
    pub fn verify(&self) -> Result<()> {
        let corrupted = |reason: String| Error::SnapshotCorrupted {
            run_id: self.run_id.clone(),
            sequence: self.sequence,
            reason,
        };

        if self.state.id != self.run_id {
            return Err(corrupted(format!(
                "state belongs to run {}",
                self.state.id
            )));
        }
        if self.state.sequence != self.sequence {
            return Err(corrupted(format!(
                "state records sequence {}",
                self.state.sequence
            )));
        }
        let actual = digest_of(&self.state)?;
        if actual != self.digest {
            return Err(corrupted(format!(
                "digest mismatch (expected {}, found {})",
                self.digest, actual
            )));
        }
        Ok(())
    }
}

fn digest_of(state: &WorkflowRun) -> Result<String> {
    let bytes = serde_json::to_vec(state)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
