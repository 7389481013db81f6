//! One backup run: resolve hosts and history, pick a timestamp and parent,
//! back up the schema once, then snapshot, upload and clean up every host.
//!
//! The run is fail-fast and never compensates. Hosts that finished before a
//! failure keep their uploads, so a failed run leaves a partial generation.

use crate::collab::Collaborators;
use crate::error::{Error, Phase, Result};
use crate::history::SnapshotHistory;
use crate::host::Host;
use crate::keys::KeyNamespace;
use crate::pool::HostPool;
use crate::timestamp::{Clock, SystemClock, Timestamp};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct BackupRequest {
    /// Chain onto the latest backup. Ignored when there is none yet.
    pub incremental: bool,
    /// Hosts processed at once; 1 is the sequential loop.
    pub concurrency: usize,
    /// Resolve timestamp and parent, touch nothing.
    pub dry_run: bool,
}

impl Default for BackupRequest {
    fn default() -> Self {
        Self {
            incremental: false,
            concurrency: 1,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Full,
    Incremental,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    pub timestamp: Timestamp,
    pub parent: Timestamp,
    pub kind: BackupKind,
    pub schema_key: String,
    pub completed_hosts: Vec<Host>,
    pub cancelled_hosts: Vec<Host>,
    pub skipped_hosts: Vec<Host>,
    pub uploaded_keys: Vec<String>,
    pub dry_run: bool,
}

#[derive(Debug)]
pub enum BackupOutcome {
    Success(BackupReport),
    /// Some hosts uploaded, then `failed_host` failed. Nothing was rolled back.
    PartialFailure {
        report: BackupReport,
        failed_host: Host,
        cause: Error,
    },
}

impl BackupOutcome {
    pub fn report(&self) -> &BackupReport {
        match self {
            BackupOutcome::Success(report) | BackupOutcome::PartialFailure { report, .. } => report,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BackupOutcome::Success(_))
    }

    /// Collapse into a single terminal result.
    pub fn into_result(self) -> Result<BackupReport> {
        match self {
            BackupOutcome::Success(report) => Ok(report),
            BackupOutcome::PartialFailure {
                report,
                failed_host,
                cause,
            } => Err(Error::HostFailed {
                host: failed_host,
                completed: report.completed_hosts,
                source: Box::new(cause),
            }),
        }
    }
}

/// Next timestamp from `clock`; must sort after everything in `history`.
pub fn next_timestamp(clock: &dyn Clock, history: &SnapshotHistory) -> Result<Timestamp> {
    let timestamp = clock.now();
    if let Some(last) = history.latest() {
        if timestamp <= *last {
            return Err(Error::NonMonotonicTimestamp {
                new: timestamp,
                last: last.clone(),
            });
        }
    }
    Ok(timestamp)
}

/// Parent for a new backup. The first backup of a keyspace is always full.
pub fn resolve_parent(history: &SnapshotHistory, timestamp: &Timestamp, incremental: bool) -> (Timestamp, BackupKind) {
    match history.latest() {
        Some(last) if incremental => (last.clone(), BackupKind::Incremental),
        _ => (timestamp.clone(), BackupKind::Full),
    }
}

pub struct BackupOrchestrator {
    collab: Collaborators,
    namespace: KeyNamespace,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl BackupOrchestrator {
    pub fn new(collab: Collaborators, namespace: KeyNamespace) -> Self {
        Self {
            collab,
            namespace,
            clock: Arc::new(SystemClock),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(&self, request: &BackupRequest) -> Result<BackupOutcome> {
        let span = info_span!(
            "backup",
            run_id = %Uuid::new_v4(),
            keyspace = %self.namespace.keyspace()
        );
        self.run_inner(request).instrument(span).await
    }

    async fn run_inner(&self, request: &BackupRequest) -> Result<BackupOutcome> {
        info!("Starting backup");

        let hosts = self
            .collab
            .driver
            .hosts()
            .await
            .map_err(|e| Error::collaborator(Phase::ResolveHosts, e))?;
        if hosts.is_empty() {
            return Err(Error::NoHosts);
        }

        let history = SnapshotHistory::load(self.collab.store.as_ref(), &self.namespace).await?;
        let timestamp = next_timestamp(self.clock.as_ref(), &history)?;
        let (parent, kind) = resolve_parent(&history, &timestamp, request.incremental);
        if request.incremental && kind == BackupKind::Full {
            info!("No previous backup, taking a full backup instead of incremental");
        }
        info!(%timestamp, %parent, ?kind, hosts = hosts.len(), "Resolved backup generation");

        let schema_key = self.namespace.schema_key(&parent, &timestamp);
        let mut report = BackupReport {
            timestamp: timestamp.clone(),
            parent: parent.clone(),
            kind,
            schema_key: schema_key.clone(),
            completed_hosts: Vec::new(),
            cancelled_hosts: Vec::new(),
            skipped_hosts: Vec::new(),
            uploaded_keys: Vec::new(),
            dry_run: request.dry_run,
        };
        if request.dry_run {
            report.skipped_hosts = hosts;
            return Ok(BackupOutcome::Success(report));
        }

        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        // nothing per host has happened yet, so a failure here leaves no trace
        self.backup_schema(&hosts[0], &schema_key).await?;

        let pool = HostPool::with_cancel(request.concurrency, self.cancel.clone());
        let pool_report = pool
            .run(&hosts, |host| self.backup_host(host, &parent, &timestamp))
            .await;

        report.completed_hosts = pool_report.completed_hosts();
        report.cancelled_hosts = pool_report.cancelled.clone();
        report.skipped_hosts = pool_report.skipped.clone();
        let interrupted = pool_report.is_interrupted();
        let mut failures = pool_report.failures.into_iter();
        for (_, keys) in pool_report.completed {
            report.uploaded_keys.extend(keys);
        }

        if let Some((failed_host, cause)) = failures.next() {
            for (host, other) in failures {
                warn!(host = %host, error = %other, "Additional host failure");
            }
            warn!(
                host = %failed_host,
                completed = report.completed_hosts.len(),
                "Backup failed, uploads of completed hosts are kept"
            );
            return Ok(BackupOutcome::PartialFailure {
                report,
                failed_host,
                cause,
            });
        }
        if interrupted {
            warn!(completed = report.completed_hosts.len(), "Backup cancelled");
            return Err(Error::Cancelled);
        }

        info!(
            %timestamp,
            files = report.uploaded_keys.len(),
            hosts = report.completed_hosts.len(),
            "Backup completed"
        );
        Ok(BackupOutcome::Success(report))
    }

    async fn backup_schema(&self, host: &Host, key: &str) -> Result<()> {
        let schema_file = self
            .collab
            .driver
            .schema_dump(host)
            .await
            .map_err(|e| Error::at_host(Phase::SchemaBackup, host, e))?;
        self.collab
            .store
            .upload(&schema_file, key)
            .await
            .map_err(|e| Error::at_key(Phase::SchemaUpload, Some(host), key, e))?;
        info!(host = %host, key, "Schema backed up");
        Ok(())
    }

    /// Snapshot, upload and clean up one host. Returns the uploaded keys.
    async fn backup_host(&self, host: Host, parent: &Timestamp, timestamp: &Timestamp) -> Result<Vec<String>> {
        info!(host = %host, "Taking snapshot");
        let snapshot = self
            .collab
            .driver
            .snapshot(&host, timestamp)
            .await
            .map_err(|e| Error::at_host(Phase::Snapshot, &host, e))?;

        let mut keys = Vec::with_capacity(snapshot.files.len());
        for file in &snapshot.files {
            let key = self.namespace.data_key(parent, timestamp, &host, &file.name);
            self.collab
                .store
                .upload(&file.local_path, &key)
                .await
                .map_err(|e| Error::at_key(Phase::Upload, Some(&host), &key, e))?;
            keys.push(key);
        }

        self.collab
            .driver
            .delete_local(&host, &snapshot.dirs)
            .await
            .map_err(|e| Error::at_host(Phase::Cleanup, &host, e))?;

        info!(host = %host, files = keys.len(), "Host backed up");
        Ok(keys)
    }
}
