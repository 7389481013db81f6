//! Cassandra node driver.
//!
//! Every operation is a shell command run through a [`RemoteExecutor`].
//! Snapshot files and schema dumps are pulled into a local staging directory
//! so the object store can read them.

use super::ssh::quote;
use crate::config::ClusterConfig;
use anyhow::Context;
use async_trait::async_trait;
use snapshot_core::{Host, NodeDriver, NodeSnapshot, RemoteExecutor, SnapshotFile, Timestamp};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

pub struct CassandraDriver {
    executor: Arc<dyn RemoteExecutor>,
    cluster: ClusterConfig,
    /// Local directory snapshot files are pulled into.
    staging: PathBuf,
    /// Scratch directory on the nodes.
    remote_tmp: String,
}

/// A file found under a node's snapshot directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPath {
    /// `{keyspace}/{table}/{file}`
    pub name: String,
    /// `{data_dir}/{keyspace}/{table}/snapshots/{tag}`
    pub dir: String,
}

/// Split a path printed by `find` into its data-relative name and snapshot dir.
pub fn parse_snapshot_path(data_dir: &str, tag: &str, path: &str) -> Option<SnapshotPath> {
    let data_dir = data_dir.trim_end_matches('/');
    let rest = path.strip_prefix(data_dir)?.strip_prefix('/')?;
    let mut parts = rest.splitn(5, '/');
    let keyspace = parts.next()?;
    let table = parts.next()?;
    if parts.next()? != "snapshots" || parts.next()? != tag {
        return None;
    }
    let file = parts.next().filter(|f| !f.is_empty())?;
    Some(SnapshotPath {
        name: format!("{keyspace}/{table}/{file}"),
        dir: format!("{data_dir}/{keyspace}/{table}/snapshots/{tag}"),
    })
}

impl CassandraDriver {
    pub fn new(executor: Arc<dyn RemoteExecutor>, cluster: ClusterConfig, staging: PathBuf, remote_tmp: String) -> Self {
        Self {
            executor,
            cluster,
            staging,
            remote_tmp,
        }
    }

    fn keyspace(&self) -> &str {
        &self.cluster.keyspace
    }

    fn host_staging(&self, host: &Host) -> PathBuf {
        self.staging.join(host.as_str())
    }
}

#[async_trait]
impl NodeDriver for CassandraDriver {
    async fn hosts(&self) -> anyhow::Result<Vec<Host>> {
        Ok(self.cluster.hosts.iter().map(|h| Host::from(h.as_str())).collect())
    }

    async fn snapshot(&self, host: &Host, timestamp: &Timestamp) -> anyhow::Result<NodeSnapshot> {
        let ks = self.keyspace();
        self.executor
            .run(
                host,
                &format!("{} snapshot -t {} {}", self.cluster.nodetool_path, timestamp, ks),
            )
            .await
            .context("nodetool snapshot")?;

        let root = format!("{}/{}", self.cluster.data_dir.trim_end_matches('/'), ks);
        let listing = self
            .executor
            .run(
                host,
                &format!(
                    "find {} -type f -path {}",
                    quote(&root),
                    quote(&format!("*/snapshots/{timestamp}/*"))
                ),
            )
            .await
            .context("listing snapshot files")?;

        let mut snapshot = NodeSnapshot::default();
        let mut dirs = BTreeSet::new();
        let local_root = self.host_staging(host).join(timestamp.as_str());
        for line in listing.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let Some(found) = parse_snapshot_path(&self.cluster.data_dir, timestamp.as_str(), line) else {
                debug!(host = %host, path = line, "Skipping file outside snapshot layout");
                continue;
            };
            let local_dir = match found.name.rsplit_once('/') {
                Some((dir, _)) => local_root.join(dir),
                None => local_root.clone(),
            };
            let local_path = self
                .executor
                .download_file(host, line, &local_dir)
                .await
                .with_context(|| format!("pulling {line}"))?;
            snapshot.files.push(SnapshotFile {
                local_path,
                name: found.name,
            });
            dirs.insert(found.dir);
        }
        snapshot.dirs = dirs.into_iter().collect();

        info!(host = %host, files = snapshot.files.len(), dirs = snapshot.dirs.len(), "Snapshot taken");
        Ok(snapshot)
    }

    async fn schema_dump(&self, host: &Host) -> anyhow::Result<PathBuf> {
        let ks = self.keyspace();
        let remote_file = format!("{}/{}.schema.gz", self.remote_tmp.trim_end_matches('/'), ks);
        let describe = format!("DESCRIBE KEYSPACE {ks}");
        self.executor
            .run(
                host,
                &format!(
                    "mkdir -p {} && {} -e {} | gzip > {}",
                    quote(&self.remote_tmp),
                    self.cluster.cqlsh_path,
                    quote(&describe),
                    quote(&remote_file)
                ),
            )
            .await
            .context("dumping schema")?;
        self.executor
            .download_file(host, &remote_file, &self.host_staging(host))
            .await
            .context("pulling schema dump")
    }

    async fn delete_local(&self, host: &Host, dirs: &[String]) -> anyhow::Result<()> {
        if !dirs.is_empty() {
            let quoted: Vec<String> = dirs.iter().map(|d| quote(d)).collect();
            self.executor
                .run(host, &format!("rm -rf {}", quoted.join(" ")))
                .await
                .context("removing snapshot directories")?;
        }

        // pulled copies are no longer needed once uploaded
        match tokio::fs::remove_dir_all(self.host_staging(host)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("removing local staging"),
        }
    }

    async fn bulk_load(&self, host: &Host, remote_dirs: &[String]) -> anyhow::Result<()> {
        for dir in remote_dirs {
            info!(host = %host, dir = %dir, "Running sstableloader");
            self.executor
                .run(
                    host,
                    &format!("{} -d {} {}", self.cluster.sstableloader_path, host, quote(dir)),
                )
                .await
                .with_context(|| format!("sstableloader {dir}"))?;
        }
        Ok(())
    }

    async fn drop_keyspace(&self, host: &Host, keyspace: &str) -> anyhow::Result<()> {
        let statement = format!("DROP KEYSPACE IF EXISTS {keyspace};");
        self.executor
            .run(
                host,
                &format!("echo {} | {}", quote(&statement), self.cluster.cqlsh_path),
            )
            .await?;
        Ok(())
    }

    async fn create_schema(&self, host: &Host, remote_schema_file: &str) -> anyhow::Result<()> {
        self.executor
            .run(
                host,
                &format!("gunzip -c {} | {}", quote(remote_schema_file), self.cluster.cqlsh_path),
            )
            .await?;
        Ok(())
    }
}
