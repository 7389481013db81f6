//! Contracts the orchestrators require from the outside world.
//!
//! Implementations own all I/O: running commands on a node, moving files to
//! and from it, and talking to durable storage. They report failures as
//! `anyhow::Error`; the orchestrators add phase, host and key context.

use crate::host::Host;
use crate::timestamp::Timestamp;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A file produced by a node snapshot, ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    /// Where the store can read the file from.
    pub local_path: PathBuf,
    /// Path relative to the node's data directory (`{keyspace}/{table}/{file}`).
    pub name: String,
}

/// Output of [`NodeDriver::snapshot`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub files: Vec<SnapshotFile>,
    /// Snapshot directories on the node, removed by [`NodeDriver::delete_local`].
    pub dirs: Vec<String>,
}

/// Database node operations.
#[async_trait]
pub trait NodeDriver: Send + Sync {
    /// Live cluster members, in a stable order.
    async fn hosts(&self) -> anyhow::Result<Vec<Host>>;

    /// Flush memtables and take a snapshot tagged with `timestamp`.
    async fn snapshot(&self, host: &Host, timestamp: &Timestamp) -> anyhow::Result<NodeSnapshot>;

    /// Dump the keyspace schema; returns a local path to the compressed dump.
    async fn schema_dump(&self, host: &Host) -> anyhow::Result<PathBuf>;

    async fn delete_local(&self, host: &Host, dirs: &[String]) -> anyhow::Result<()>;

    /// Stream staged data files in `remote_dirs` into the cluster through `host`.
    async fn bulk_load(&self, host: &Host, remote_dirs: &[String]) -> anyhow::Result<()>;

    async fn drop_keyspace(&self, host: &Host, keyspace: &str) -> anyhow::Result<()>;

    /// Apply a schema dump already present on `host`.
    async fn create_schema(&self, host: &Host, remote_schema_file: &str) -> anyhow::Result<()>;
}

/// Command execution and file transfer against a node.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn run(&self, host: &Host, command: &str) -> anyhow::Result<String>;

    /// Copy `local` into `remote_dir` (created if needed), keeping its file name.
    async fn upload_file(&self, host: &Host, local: &Path, remote_dir: &str) -> anyhow::Result<()>;

    /// Copy `remote_path` into `local_dir`, returning the local file path.
    async fn download_file(&self, host: &Host, remote_path: &str, local_dir: &Path) -> anyhow::Result<PathBuf>;
}

/// Key-addressed durable storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, local: &Path, key: &str) -> anyhow::Result<()>;

    /// Fetch `key` to `local_dir/key` and return that path.
    async fn download(&self, key: &str, local_dir: &Path) -> anyhow::Result<PathBuf>;

    /// All keys starting with `prefix`.
    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>>;
}

/// The collaborators one run works against.
#[derive(Clone)]
pub struct Collaborators {
    pub driver: Arc<dyn NodeDriver>,
    pub executor: Arc<dyn RemoteExecutor>,
    pub store: Arc<dyn ObjectStore>,
}
