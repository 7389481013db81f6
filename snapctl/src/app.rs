//! Wires configuration into the core collaborators.

use crate::collab::{CassandraDriver, FsObjectStore, SshExecutor};
use crate::config::Config;
use snapshot_core::{
    BackupOrchestrator, BackupRequest, Collaborators, Host, KeyNamespace, RemoteExecutor, RestoreOrchestrator,
    RestoreRequest, SnapshotHistory,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct App {
    pub config: Config,
    pub namespace: KeyNamespace,
    pub collab: Collaborators,
}

impl App {
    pub fn new(config: Config) -> Self {
        let executor: Arc<dyn RemoteExecutor> = Arc::new(SshExecutor::new(&config.ssh));
        Self::with_executor(config, executor)
    }

    /// Build against an arbitrary executor.
    pub fn with_executor(config: Config, executor: Arc<dyn RemoteExecutor>) -> Self {
        let driver = CassandraDriver::new(
            executor.clone(),
            config.cluster.clone(),
            config.snapshot_staging(),
            format!("{}/dump", config.restore.temp_dir.display()),
        );
        let store = FsObjectStore::new(&config.storage.root);
        let namespace = KeyNamespace::new(&config.storage.base_path, config.cluster.keyspace.clone());
        Self {
            namespace,
            collab: Collaborators {
                driver: Arc::new(driver),
                executor,
                store: Arc::new(store),
            },
            config,
        }
    }

    pub fn backup(&self, cancel: CancellationToken) -> BackupOrchestrator {
        BackupOrchestrator::new(self.collab.clone(), self.namespace.clone()).with_cancel(cancel)
    }

    pub fn restore(&self, cancel: CancellationToken) -> RestoreOrchestrator {
        RestoreOrchestrator::new(self.collab.clone(), self.namespace.clone()).with_cancel(cancel)
    }

    /// Backup request from config, with command-line overrides applied.
    pub fn backup_request(&self, incremental: Option<bool>, concurrency: Option<usize>, dry_run: bool) -> BackupRequest {
        BackupRequest {
            incremental: incremental.unwrap_or(self.config.backup.incremental),
            concurrency: concurrency.unwrap_or(self.config.backup.concurrency),
            dry_run,
        }
    }

    pub fn restore_request(&self, snapshot: Option<String>, host: Option<String>, dry_run: bool) -> RestoreRequest {
        RestoreRequest {
            snapshot,
            target_host: host.or_else(|| self.config.restore.target_host.clone()).map(Host::from),
            local_staging: self.config.local_staging(),
            remote_staging: self.config.remote_staging(),
            dry_run,
        }
    }

    pub async fn history(&self) -> snapshot_core::Result<SnapshotHistory> {
        SnapshotHistory::load(self.collab.store.as_ref(), &self.namespace).await
    }
}
