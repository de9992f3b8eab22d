//! Context store trait and the in-memory implementation.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use crate::capability::RegistryTable;
use crate::error::{Error, Result};

use super::snapshot::ContextSnapshot;

/// Append-only snapshot log per run, plus the current capability table.
///
/// Implementations never rewrite a stored snapshot and reject any
/// sequence that is not strictly greater than the latest one.
pub trait ContextStore: Send + Sync {
    fn append(&self, snapshot: &ContextSnapshot) -> Result<()>;

    /// Highest-sequence snapshot of a run, if the run exists
    fn latest(&self, run_id: &str) -> Result<Option<ContextSnapshot>>;

    fn load(&self, run_id: &str, sequence: u64) -> Result<ContextSnapshot>;

    /// Stored sequence numbers of a run, ascending
    fn sequences(&self, run_id: &str) -> Result<Vec<u64>>;

    fn run_ids(&self) -> Result<Vec<String>>;

    fn load_registry(&self) -> Result<Option<RegistryTable>>;

    fn save_registry(&self, table: &RegistryTable) -> Result<()>;
}

/// Check a new snapshot against the head of its log
pub(crate) fn ensure_after(snapshot: &ContextSnapshot, latest: Option<u64>) -> Result<()> {
    match latest {
        Some(latest) if snapshot.sequence <= latest => Err(Error::SnapshotOutOfOrder {
            run_id: snapshot.run_id.clone(),
            sequence: snapshot.sequence,
            latest,
        }),
        _ => Ok(()),
    }
}

/// Process-local store, used in tests and for ephemeral runs
#[derive(Default)]
pub struct MemoryStore {
    runs: RwLock<HashMap<String, BTreeMap<u64, ContextSnapshot>>>,
    registry: RwLock<Option<RegistryTable>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContextStore for MemoryStore {
    fn append(&self, snapshot: &ContextSnapshot) -> Result<()> {
        snapshot.verify()?;
        let mut runs = self.runs.write();
        let log = runs.entry(snapshot.run_id.clone()).or_default();
        ensure_after(snapshot, log.keys().next_back().copied())?;
        log.insert(snapshot.sequence, snapshot.clone());
        Ok(())
    }

    fn latest(&self, run_id: &str) -> Result<Option<ContextSnapshot>> {
        Ok(self
            .runs
            .read()
            .get(run_id)
            .and_then(|log| log.values().next_back().cloned()))
    }

    fn load(&self, run_id: &str, sequence: u64) -> Result<ContextSnapshot> {
        self.runs
            .read()
            .get(run_id)
            .and_then(|log| log.get(&sequence).cloned())
            .ok_or_else(|| Error::not_found("snapshot", format!("{}@{}", run_id, sequence)))
    }

    fn sequences(&self, run_id: &str) -> Result<Vec<u64>> {
        Ok(self
            .runs
            .read()
            .get(run_id)
            .map(|log| log.keys().copied().collect())
            .unwrap_or_default())
    }

    fn run_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.runs.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn load_registry(&self) -> Result<Option<RegistryTable>> {
        Ok(self.registry.read().clone())
    }

    fn save_registry(&self, table: &RegistryTable) -> Result<()> {
        *self.registry.write() = Some(table.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowRun;
    use chrono::Utc;

    fn snap(seq: u64) -> ContextSnapshot {
        let mut run = WorkflowRun::new("run-1", "goal", Utc::now());
        run.sequence = seq;
        ContextSnapshot::capture(&run, Utc::now()).unwrap()
    }

    #[test]
    fn test_rejects_non_increasing_sequence() {
        let store = MemoryStore::new();
        store.append(&snap(1)).unwrap();
        store.append(&snap(2)).unwrap();

        let err = store.append(&snap(2)).unwrap_err();
        assert!(matches!(err, Error::SnapshotOutOfOrder { latest: 2, .. }));
        assert!(store.append(&snap(1)).is_err());
        assert_eq!(store.sequences("run-1").unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_latest_and_load() {
        let store = MemoryStore::new();
        assert!(store.latest("run-1").unwrap().is_none());
        store.append(&snap(1)).unwrap();
        store.append(&snap(5)).unwrap();

        assert_eq!(store.latest("run-1").unwrap().unwrap().sequence, 5);
        assert_eq!(store.load("run-1", 1).unwrap().sequence, 1);
        assert!(matches!(
            store.load("run-1", 3),
            Err(Error::NotFound { .. })
        ));
        assert_eq!(store.run_ids().unwrap(), vec!["run-1"]);
    }
}
