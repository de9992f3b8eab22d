//! On-disk context store.
//!
//! Layout under the data directory:
//!
//! ```text
//! capabilities.json                  current registry table
//! runs/<run-id>/<sequence:020>.json  one file per snapshot
//! ```
//!
//! Snapshot files are created exclusively and never rewritten.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::capability::RegistryTable;
use crate::error::{Error, Result};

use super::snapshot::ContextSnapshot;
use super::store::{ensure_after, ContextStore};

const REGISTRY_FILE: &str = "capabilities.json";
const RUNS_DIR: &str = "runs";

pub struct FileStore {
    root: PathBuf,
    /// Serializes appends within this process
    append_lock: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let runs = root.join(RUNS_DIR);
        fs::create_dir_all(&runs).map_err(|e| Error::IoWrite {
            path: runs.clone(),
            source: e,
        })?;
        debug!(root = %root.display(), "Context store opened");
        Ok(Self {
            root,
            append_lock: Mutex::new(()),
        })
    }

    fn run_dir(&self, run_id: &str) -> Result<PathBuf> {
        let valid = !run_id.is_empty()
            && run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(Error::not_found("run", run_id));
        }
        Ok(self.root.join(RUNS_DIR).join(run_id))
    }

    fn snapshot_path(dir: &Path, sequence: u64) -> PathBuf {
        dir.join(format!("{:020}.json", sequence))
    }

    fn read_snapshot(path: &Path) -> Result<ContextSnapshot> {
        let content = fs::read(path).map_err(|e| Error::IoRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let snapshot: ContextSnapshot = serde_json::from_slice(&content)?;
        snapshot.verify()?;
        Ok(snapshot)
    }

    fn list_sequences(dir: &Path) -> Result<Vec<u64>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::IoRead {
                    path: dir.to_path_buf(),
                    source: e,
                })
            }
        };

        let mut sequences: Vec<u64> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_str()?;
                name.strip_suffix(".json")?.parse().ok()
            })
            .collect();
        sequences.sort_unstable();
        Ok(sequences)
    }
}

impl ContextStore for FileStore {
    fn append(&self, snapshot: &ContextSnapshot) -> Result<()> {
        snapshot.verify()?;
        let dir = self.run_dir(&snapshot.run_id)?;

        let _guard = self.append_lock.lock();
        fs::create_dir_all(&dir).map_err(|e| Error::IoWrite {
            path: dir.clone(),
            source: e,
        })?;
        ensure_after(snapshot, Self::list_sequences(&dir)?.last().copied())?;

        let path = Self::snapshot_path(&dir, snapshot.sequence);
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let write_err = |e| Error::IoWrite {
            path: path.clone(),
            source: e,
        };

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            // Another process won the race for this sequence
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::SnapshotOutOfOrder {
                    run_id: snapshot.run_id.clone(),
                    sequence: snapshot.sequence,
                    latest: snapshot.sequence,
                })
            }
            Err(e) => return Err(write_err(e)),
        };
        file.write_all(&bytes).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;

        trace!(
            run = %snapshot.run_id,
            sequence = snapshot.sequence,
            path = %path.display(),
            "Snapshot written"
        );
        Ok(())
    }

    fn latest(&self, run_id: &str) -> Result<Option<ContextSnapshot>> {
        let dir = self.run_dir(run_id)?;
        match Self::list_sequences(&dir)?.last() {
            Some(&sequence) => Self::read_snapshot(&Self::snapshot_path(&dir, sequence)).map(Some),
            None => Ok(None),
        }
    }

    fn load(&self, run_id: &str, sequence: u64) -> Result<ContextSnapshot> {
        let path = Self::snapshot_path(&self.run_dir(run_id)?, sequence);
        if !path.is_file() {
            return Err(Error::not_found(
                "snapshot",
                format!("{}@{}", run_id, sequence),
            ));
        }
        Self::read_snapshot(&path)
    }

    fn sequences(&self, run_id: &str) -> Result<Vec<u64>> {
        Self::list_sequences(&self.run_dir(run_id)?)
    }

    fn run_ids(&self) -> Result<Vec<String>> {
        let dir = self.root.join(RUNS_DIR);
        let entries = fs::read_dir(&dir).map_err(|e| Error::IoRead {
            path: dir.clone(),
            source: e,
        })?;
        let mut ids: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn load_registry(&self) -> Result<Option<RegistryTable>> {
        let path = self.root.join(REGISTRY_FILE);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::IoRead { path, source: e }),
        }
    }

    fn save_registry(&self, table: &RegistryTable) -> Result<()> {
        let path = self.root.join(REGISTRY_FILE);
        let tmp = self.root.join(format!("{}.tmp", REGISTRY_FILE));
        let bytes = serde_json::to_vec_pretty(table)?;

        let write_err = |e| Error::IoWrite {
            path: tmp.clone(),
            source: e,
        };
        let mut file = File::create(&tmp).map_err(write_err)?;
        file.write_all(&bytes).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        fs::rename(&tmp, &path).map_err(|e| Error::IoWrite {
            path: path.clone(),
            source: e,
        })?;
        Ok(())
    }
}
