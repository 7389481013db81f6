//! Snapshot history and backup/restore orchestration for clustered keyspaces.
//!
//! Backups form parent-linked generations stored under a deterministic key
//! layout ([`keys`]). [`history`] rebuilds the generation chain from a key
//! listing, and the [`orchestrator`] module drives multi-host backup and
//! restore against the collaborator traits in [`collab`].

pub mod collab;
pub mod error;
pub mod history;
pub mod host;
pub mod keys;
pub mod orchestrator;
pub mod pool;
pub mod timestamp;

#[cfg(test)]
mod testing;

pub use collab::{Collaborators, NodeDriver, NodeSnapshot, ObjectStore, RemoteExecutor, SnapshotFile};
pub use error::{Error, Phase, Result};
pub use history::{SnapshotHistory, SnapshotRecord};
pub use host::Host;
pub use keys::{KeyNamespace, ParsedKey};
pub use orchestrator::{
    BackupKind, BackupOrchestrator, BackupOutcome, BackupReport, BackupRequest, RestoreOrchestrator,
    RestoreReport, RestoreRequest,
};
pub use pool::{HostPool, PoolReport};
pub use timestamp::{Clock, FixedClock, SystemClock, Timestamp};
