//! One restore run: pick a snapshot, drop the keyspace, recreate its schema,
//! then download the snapshot's full ancestor chain and bulk-load it through
//! one host.
//!
//! Dropping the keyspace cannot be undone. A failure after that step leaves
//! the keyspace dropped or half restored; staged files are not cleaned up.

use crate::collab::Collaborators;
use crate::error::{Error, Phase, Result};
use crate::history::SnapshotHistory;
use crate::host::Host;
use crate::keys::KeyNamespace;
use crate::timestamp::Timestamp;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RestoreRequest {
    /// Snapshot to restore; the latest one if unset.
    pub snapshot: Option<String>,
    /// Host that receives schema and data; the first cluster host if unset.
    pub target_host: Option<Host>,
    /// Local directory for downloaded objects.
    pub local_staging: PathBuf,
    /// Directory on the target host for pushed files.
    pub remote_staging: String,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub snapshot: Timestamp,
    pub parent: Timestamp,
    /// Snapshot followed by its ancestors down to the full backup.
    pub chain: Vec<Timestamp>,
    pub host: Host,
    pub files: usize,
    pub remote_dirs: Vec<String>,
    pub dry_run: bool,
}

/// Remote directory a key is pushed to: the key's own directory under `staging`.
pub fn remote_dir_for(staging: &str, key: &str) -> String {
    let full = format!("{}/{}", staging.trim_end_matches('/'), key.trim_start_matches('/'));
    match full.rsplit_once('/') {
        Some((dir, _)) if !dir.is_empty() => dir.to_string(),
        _ => staging.to_string(),
    }
}

pub struct RestoreOrchestrator {
    collab: Collaborators,
    namespace: KeyNamespace,
    cancel: CancellationToken,
}

impl RestoreOrchestrator {
    pub fn new(collab: Collaborators, namespace: KeyNamespace) -> Self {
        Self {
            collab,
            namespace,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(&self, request: &RestoreRequest) -> Result<RestoreReport> {
        let span = info_span!(
            "restore",
            run_id = %Uuid::new_v4(),
            keyspace = %self.namespace.keyspace()
        );
        self.run_inner(request).instrument(span).await
    }

    async fn run_inner(&self, request: &RestoreRequest) -> Result<RestoreReport> {
        info!("Starting restore");

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
        let target = match &request.snapshot {
            Some(snapshot) => snapshot.clone(),
            None => history.latest().ok_or(Error::NoBackupAvailable)?.to_string(),
        };
        if !history.valid(&target) {
            return Err(Error::InvalidSnapshot(target));
        }
        let snapshot = Timestamp::parse(&target).map_err(|_| Error::InvalidSnapshot(target.clone()))?;
        let host = match &request.target_host {
            Some(host) if !hosts.contains(host) => return Err(Error::UnknownHost(host.clone())),
            Some(host) => host.clone(),
            None => hosts[0].clone(),
        };

        // resolve everything the restore needs before the irreversible drop
        let parent = history.parent(&snapshot)?;
        let chain = history.chain(&snapshot)?;
        let keys = history.keys(&snapshot)?;
        if history.get(snapshot.as_str()).and_then(|r| r.schema_key.as_ref()).is_none() {
            return Err(Error::SchemaMissing {
                key: self.namespace.schema_key(&parent, &snapshot),
                snapshot,
            });
        }
        info!(
            %snapshot,
            %parent,
            generations = chain.len(),
            files = keys.len(),
            host = %host,
            "Resolved restore target"
        );

        let mut report = RestoreReport {
            snapshot: snapshot.clone(),
            parent: parent.clone(),
            chain,
            host: host.clone(),
            files: keys.len(),
            remote_dirs: Vec::new(),
            dry_run: request.dry_run,
        };
        if request.dry_run {
            report.remote_dirs = keys
                .keys()
                .map(|key| remote_dir_for(&request.remote_staging, key))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            return Ok(report);
        }
        self.check_cancelled()?;

        warn!(host = %host, keyspace = %self.namespace.keyspace(), "Dropping keyspace");
        self.collab
            .driver
            .drop_keyspace(&host, self.namespace.keyspace())
            .await
            .map_err(|e| Error::at_host(Phase::DropKeyspace, &host, e))?;

        self.restore_schema(&host, &parent, &snapshot, request).await?;

        let mut staged = Vec::with_capacity(keys.len());
        for key in keys.keys() {
            self.check_cancelled()?;
            let local = self
                .collab
                .store
                .download(key, &request.local_staging)
                .await
                .map_err(|e| Error::at_key(Phase::Download, None, key, e))?;
            debug!(key = %key, local = %local.display(), "Downloaded");
            staged.push((key.as_str(), local));
        }
        info!(files = staged.len(), "Downloaded snapshot files");

        let mut dirs = BTreeSet::new();
        for (key, local) in &staged {
            self.check_cancelled()?;
            let remote_dir = remote_dir_for(&request.remote_staging, key);
            self.collab
                .executor
                .upload_file(&host, local, &remote_dir)
                .await
                .map_err(|e| Error::at_key(Phase::Redistribute, Some(&host), key, e))?;
            dirs.insert(remote_dir);
        }
        report.remote_dirs = dirs.into_iter().collect();
        info!(host = %host, dirs = report.remote_dirs.len(), "Pushed files to host");

        self.check_cancelled()?;
        self.collab
            .driver
            .bulk_load(&host, &report.remote_dirs)
            .await
            .map_err(|e| Error::at_host(Phase::BulkLoad, &host, e))?;

        info!(%snapshot, host = %host, "Restore completed");
        Ok(report)
    }

    async fn restore_schema(
        &self,
        host: &Host,
        parent: &Timestamp,
        snapshot: &Timestamp,
        request: &RestoreRequest,
    ) -> Result<()> {
        let key = self.namespace.schema_key(parent, snapshot);
        let fail = |e| Error::at_key(Phase::RestoreSchema, Some(host), &key, e);

        let local = self
            .collab
            .store
            .download(&key, &request.local_staging)
            .await
            .map_err(fail)?;
        let remote_dir = remote_dir_for(&request.remote_staging, &key);
        self.collab
            .executor
            .upload_file(host, &local, &remote_dir)
            .await
            .map_err(fail)?;

        let remote_file = format!("{}/{}", remote_dir, file_name(&local));
        self.collab
            .driver
            .create_schema(host, &remote_file)
            .await
            .map_err(fail)?;
        info!(host = %host, key = %key, "Schema restored");
        Ok(())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse(s).unwrap()
    }

    fn ns() -> KeyNamespace {
        KeyNamespace::new("backups", "ks")
    }

    fn request(snapshot: Option<&str>) -> RestoreRequest {
        RestoreRequest {
            snapshot: snapshot.map(str::to_string),
            target_host: None,
            local_staging: PathBuf::from("/tmp/snap/local"),
            remote_staging: "/tmp/snap/remote".to_string(),
            dry_run: false,
        }
    }

    fn seed(fx: &Fixture, parent: &str, t: &str, file: &str) {
        let ns = ns();
        fx.store.insert(&ns.schema_key(&ts(parent), &ts(t)));
        fx.store
            .insert(&ns.data_key(&ts(parent), &ts(t), &Host::from("h1"), &format!("ks/t-1/{file}")));
    }

    fn seed_chain(fx: &Fixture) {
        seed(fx, "2024-01-01_000000", "2024-01-01_000000", "a-Data.db");
        seed(fx, "2024-01-01_000000", "2024-01-02_000000", "b-Data.db");
        seed(fx, "2024-01-02_000000", "2024-01-03_000000", "c-Data.db");
    }

    #[tokio::test]
    async fn test_restore_latest_loads_whole_chain() {
        let fx = Fixture::new(&["h1", "h2"]);
        seed_chain(&fx);

        let report = RestoreOrchestrator::new(fx.collaborators(), ns())
            .run(&request(None))
            .await
            .unwrap();

        assert_eq!(report.snapshot, ts("2024-01-03_000000"));
        assert_eq!(report.parent, ts("2024-01-02_000000"));
        assert_eq!(report.chain.len(), 3);
        assert_eq!(report.files, 3);
        assert_eq!(report.host, Host::from("h1"));
        // one sstable directory per generation
        assert_eq!(report.remote_dirs.len(), 3);
        assert!(report.remote_dirs.iter().all(|d| d.starts_with("/tmp/snap/remote/backups/ks/")));
        assert!(report.remote_dirs.iter().all(|d| d.ends_with("/h1/ks/t-1")));
        assert_eq!(fx.journal.count("download backups/ks/2024-01-0"), 4);
        assert_eq!(fx.journal.count("bulk_load h1"), 1);
    }

    #[tokio::test]
    async fn test_restore_step_order() {
        let fx = Fixture::new(&["h1"]);
        seed_chain(&fx);
        RestoreOrchestrator::new(fx.collaborators(), ns())
            .run(&request(Some("2024-01-02_000000")))
            .await
            .unwrap();

        let schema_dir = "/tmp/snap/remote/backups/ks/2024-01-01_000000/2024-01-02_000000";
        let drop = fx.journal.position("drop_keyspace h1 ks").unwrap();
        let schema_push = fx.journal.position(&format!("push h1 {schema_dir}/ks.schema.gz")).unwrap();
        let create = fx
            .journal
            .position(&format!("create_schema h1 {schema_dir}/ks.schema.gz"))
            .unwrap();
        let entries = fx.journal.entries();
        let bulk = entries.iter().position(|e| e.starts_with("bulk_load")).unwrap();
        let first_data = entries.iter().position(|e| e.ends_with("a-Data.db") && e.starts_with("download")).unwrap();

        assert!(drop < schema_push && schema_push < create && create < first_data && first_data < bulk);
        // 2024-01-03 is a descendant, not an ancestor
        assert_eq!(fx.journal.count("download backups/ks/2024-01-02_000000/"), 0);
    }

    #[tokio::test]
    async fn test_empty_history_has_no_backup() {
        let fx = Fixture::new(&["h1"]);
        let err = RestoreOrchestrator::new(fx.collaborators(), ns())
            .run(&request(None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoBackupAvailable));
        assert!(fx.journal.entries().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_snapshot_is_invalid() {
        let fx = Fixture::new(&["h1"]);
        seed_chain(&fx);
        for snapshot in ["2024-03-01_000000", "not-a-timestamp"] {
            let err = RestoreOrchestrator::new(fx.collaborators(), ns())
                .run(&request(Some(snapshot)))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidSnapshot(ref s) if s == snapshot));
        }
        assert_eq!(fx.journal.count("drop_keyspace"), 0);
    }

    #[tokio::test]
    async fn test_no_hosts() {
        let fx = Fixture::new(&[]);
        seed_chain(&fx);
        let err = RestoreOrchestrator::new(fx.collaborators(), ns())
            .run(&request(None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoHosts));
    }

    #[tokio::test]
    async fn test_broken_chain_detected_before_drop() {
        let fx = Fixture::new(&["h1"]);
        // parent 2024-01-01 was deleted
        seed(&fx, "2024-01-01_000000", "2024-01-02_000000", "b-Data.db");
        let err = RestoreOrchestrator::new(fx.collaborators(), ns())
            .run(&request(None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ChainBroken { .. }));
        assert_eq!(fx.journal.count("drop_keyspace"), 0);
    }

    #[tokio::test]
    async fn test_explicit_target_host() {
        let fx = Fixture::new(&["h1", "h2"]);
        seed_chain(&fx);
        let mut req = request(None);
        req.target_host = Some(Host::from("h2"));
        let report = RestoreOrchestrator::new(fx.collaborators(), ns()).run(&req).await.unwrap();
        assert_eq!(report.host, Host::from("h2"));
        assert_eq!(fx.journal.count("drop_keyspace h2"), 1);
        assert_eq!(fx.journal.count("bulk_load h2"), 1);
    }

    #[tokio::test]
    async fn test_redistribute_failure_names_key() {
        let fx = Fixture::new(&["h1"]);
        seed_chain(&fx);
        fx.executor.fail_push("2024-01-02_000000/2024-01-03_000000/h1");
        let err = RestoreOrchestrator::new(fx.collaborators(), ns())
            .run(&request(None))
            .await
            .unwrap_err();
        assert_eq!(err.phase(), Some(Phase::Redistribute));
        assert!(err.to_string().contains("c-Data.db"));
        assert_eq!(fx.journal.count("bulk_load"), 0);
    }

    #[tokio::test]
    async fn test_bulk_load_failure() {
        let fx = Fixture::new(&["h1"]);
        seed_chain(&fx);
        fx.driver.fail_on("bulk_load", "h1");
        let err = RestoreOrchestrator::new(fx.collaborators(), ns())
            .run(&request(None))
            .await
            .unwrap_err();
        assert_eq!(err.phase(), Some(Phase::BulkLoad));
    }

    #[tokio::test]
    async fn test_missing_schema_detected_before_drop() {
        let fx = Fixture::new(&["h1"]);
        // data only, the schema key is gone
        fx.store.insert(&ns().data_key(
            &ts("2024-01-01_000000"),
            &ts("2024-01-01_000000"),
            &Host::from("h1"),
            "ks/t-1/a-Data.db",
        ));
        for dry_run in [false, true] {
            let mut req = request(None);
            req.dry_run = dry_run;
            let err = RestoreOrchestrator::new(fx.collaborators(), ns())
                .run(&req)
                .await
                .unwrap_err();
            match err {
                Error::SchemaMissing { snapshot, key } => {
                    assert_eq!(snapshot, ts("2024-01-01_000000"));
                    assert_eq!(key, "backups/ks/2024-01-01_000000/2024-01-01_000000/ks.schema.gz");
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(fx.journal.count("drop_keyspace"), 0);
        assert_eq!(fx.journal.count("download"), 0);
    }

    #[tokio::test]
    async fn test_target_host_outside_cluster_rejected() {
        let fx = Fixture::new(&["h1", "h2"]);
        seed_chain(&fx);
        let mut req = request(None);
        req.target_host = Some(Host::from("h9"));
        let err = RestoreOrchestrator::new(fx.collaborators(), ns()).run(&req).await.unwrap_err();
        assert!(matches!(err, Error::UnknownHost(ref h) if h.as_str() == "h9"));
        assert_eq!(fx.journal.count("drop_keyspace"), 0);
    }

    #[tokio::test]
    async fn test_dry_run_is_read_only() {
        let fx = Fixture::new(&["h1"]);
        seed_chain(&fx);
        let mut req = request(None);
        req.dry_run = true;
        let report = RestoreOrchestrator::new(fx.collaborators(), ns()).run(&req).await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.remote_dirs.len(), 3);
        assert!(fx.journal.entries().is_empty());
    }

    #[test]
    fn test_remote_dir_for() {
        assert_eq!(remote_dir_for("/tmp/remote/", "b/ks/p/t/h/ks/tbl/f.db"), "/tmp/remote/b/ks/p/t/h/ks/tbl");
        assert_eq!(remote_dir_for("/tmp/remote", "f.db"), "/tmp/remote");
    }
}
