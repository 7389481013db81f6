//! Backup and restore state machines.
//!
//! Each run loads the snapshot history once and hands it down; nothing is
//! cached between runs. At most one run per keyspace may be active at a
//! time, which callers must guarantee.

pub mod backup;
pub mod restore;

pub use backup::{BackupKind, BackupOrchestrator, BackupOutcome, BackupReport, BackupRequest};
pub use restore::{RestoreOrchestrator, RestoreReport, RestoreRequest};
