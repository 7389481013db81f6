//! Error taxonomy for backup and restore runs.

use crate::host::Host;
use crate::timestamp::Timestamp;
use std::fmt;

/// Step of a backup or restore run, reported with collaborator failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ResolveHosts,
    SchemaBackup,
    SchemaUpload,
    Snapshot,
    Upload,
    Cleanup,
    DropKeyspace,
    RestoreSchema,
    Download,
    Redistribute,
    BulkLoad,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::ResolveHosts => "resolve hosts",
            Phase::SchemaBackup => "schema backup",
            Phase::SchemaUpload => "schema upload",
            Phase::Snapshot => "snapshot",
            Phase::Upload => "upload",
            Phase::Cleanup => "cleanup",
            Phase::DropKeyspace => "drop keyspace",
            Phase::RestoreSchema => "restore schema",
            Phase::Download => "download",
            Phase::Redistribute => "redistribute",
            Phase::BulkLoad => "bulk load",
        };
        f.write_str(name)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no database hosts available")]
    NoHosts,

    #[error("new timestamp {new} is not after latest backup {last}")]
    NonMonotonicTimestamp { new: Timestamp, last: Timestamp },

    #[error("snapshot history unavailable")]
    HistoryUnavailable(#[source] anyhow::Error),

    #[error("unknown snapshot {0}")]
    UnknownSnapshot(Timestamp),

    #[error("ancestor chain of {snapshot} is broken: {missing} is missing")]
    ChainBroken { snapshot: Timestamp, missing: Timestamp },

    #[error("{0} is not a valid snapshot")]
    InvalidSnapshot(String),

    #[error("no existing backup to restore from")]
    NoBackupAvailable,

    #[error("schema dump of {snapshot} is missing ({key})")]
    SchemaMissing { snapshot: Timestamp, key: String },

    #[error("{0} is not one of the cluster hosts")]
    UnknownHost(Host),

    #[error("malformed key {key:?}: {reason}")]
    MalformedKey { key: String, reason: String },

    #[error("{}", context(.phase, .host.as_ref(), .key.as_deref()))]
    Collaborator {
        phase: Phase,
        host: Option<Host>,
        key: Option<String>,
        #[source]
        source: anyhow::Error,
    },

    #[error("backup failed @ {host} after {} completed host(s)", .completed.len())]
    HostFailed {
        host: Host,
        completed: Vec<Host>,
        #[source]
        source: Box<Error>,
    },

    #[error("run cancelled")]
    Cancelled,
}

fn context(phase: &Phase, host: Option<&Host>, key: Option<&str>) -> String {
    let mut out = phase.to_string();
    if let Some(host) = host {
        out.push_str(&format!(" @ {host}"));
    }
    if let Some(key) = key {
        out.push_str(&format!(" [{key}]"));
    }
    out
}

impl Error {
    pub fn collaborator(phase: Phase, source: anyhow::Error) -> Self {
        Error::Collaborator { phase, host: None, key: None, source }
    }

    pub fn at_host(phase: Phase, host: &Host, source: anyhow::Error) -> Self {
        Error::Collaborator { phase, host: Some(host.clone()), key: None, source }
    }

    pub fn at_key(phase: Phase, host: Option<&Host>, key: &str, source: anyhow::Error) -> Self {
        Error::Collaborator {
            phase,
            host: host.cloned(),
            key: Some(key.to_string()),
            source,
        }
    }

    /// Phase of a collaborator failure, looking through `HostFailed`.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Error::Collaborator { phase, .. } => Some(*phase),
            Error::HostFailed { source, .. } => source.phase(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
