//! Session continuity
//!
//! Every transition of a run is sealed into a snapshot and appended to
//! that run's log. A run resumes from its highest-sequence snapshot.

mod file;
mod snapshot;
mod store;

pub use file::FileStore;
pub use snapshot::ContextSnapshot;
pub use store::{ContextStore, MemoryStore};
