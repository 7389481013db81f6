//! In-memory collaborators for unit tests. Every call is appended to a
//! shared journal so tests can assert on cross-collaborator ordering.

use crate::collab::{Collaborators, NodeDriver, NodeSnapshot, ObjectStore, RemoteExecutor, SnapshotFile};
use crate::host::Host;
use crate::timestamp::Timestamp;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries().iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, PathBuf>>,
    fail_list: AtomicBool,
    fail_upload: Mutex<Vec<String>>,
    pub journal: Journal,
}

impl MemoryStore {
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            ..Default::default()
        }
    }

    pub fn insert(&self, key: &str) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), PathBuf::from("/seed").join(key));
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn fail_list(&self) {
        self.fail_list.store(true, Ordering::SeqCst);
    }

    /// Fail uploads whose key contains `pattern`.
    pub fn fail_upload(&self, pattern: &str) {
        self.fail_upload.lock().unwrap().push(pattern.to_string());
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn upload(&self, local: &Path, key: &str) -> anyhow::Result<()> {
        if self.fail_upload.lock().unwrap().iter().any(|p| key.contains(p.as_str())) {
            anyhow::bail!("injected upload failure");
        }
        self.journal.push(format!("upload {key}"));
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), local.to_path_buf());
        Ok(())
    }

    async fn download(&self, key: &str, local_dir: &Path) -> anyhow::Result<PathBuf> {
        if !self.objects.lock().unwrap().contains_key(key) {
            anyhow::bail!("no such key");
        }
        self.journal.push(format!("download {key}"));
        Ok(local_dir.join(key))
    }

    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        if self.fail_list.load(Ordering::SeqCst) {
            anyhow::bail!("injected list failure");
        }
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct FakeDriver {
    hosts: Vec<Host>,
    failures: Mutex<HashSet<String>>,
    pub journal: Journal,
}

impl FakeDriver {
    pub fn new(hosts: &[&str], journal: Journal) -> Self {
        Self {
            hosts: hosts.iter().map(|h| Host::from(*h)).collect(),
            failures: Mutex::new(HashSet::new()),
            journal,
        }
    }

    /// Make `op` fail on `host` (`op` is the journal verb, e.g. `snapshot`).
    pub fn fail_on(&self, op: &str, host: &str) {
        self.failures.lock().unwrap().insert(format!("{op} {host}"));
    }

    fn call(&self, entry: String) -> anyhow::Result<()> {
        let op_host: String = entry.splitn(3, ' ').take(2).collect::<Vec<_>>().join(" ");
        if self.failures.lock().unwrap().contains(&op_host) {
            anyhow::bail!("injected failure: {op_host}");
        }
        self.journal.push(entry);
        Ok(())
    }
}

#[async_trait]
impl NodeDriver for FakeDriver {
    async fn hosts(&self) -> anyhow::Result<Vec<Host>> {
        Ok(self.hosts.clone())
    }

    async fn snapshot(&self, host: &Host, timestamp: &Timestamp) -> anyhow::Result<NodeSnapshot> {
        self.call(format!("snapshot {host} {timestamp}"))?;
        let files = ["nb-1-big-Data.db", "nb-1-big-Index.db"]
            .iter()
            .map(|name| SnapshotFile {
                local_path: PathBuf::from(format!("/stage/{host}/{name}")),
                name: format!("ks/t-1/{name}"),
            })
            .collect();
        Ok(NodeSnapshot {
            files,
            dirs: vec![format!("/data/ks/t-1/snapshots/{timestamp}")],
        })
    }

    async fn schema_dump(&self, host: &Host) -> anyhow::Result<PathBuf> {
        self.call(format!("schema_dump {host}"))?;
        Ok(PathBuf::from("/stage/ks.schema.gz"))
    }

    async fn delete_local(&self, host: &Host, dirs: &[String]) -> anyhow::Result<()> {
        self.call(format!("delete_local {host} {}", dirs.join(",")))
    }

    async fn bulk_load(&self, host: &Host, remote_dirs: &[String]) -> anyhow::Result<()> {
        self.call(format!("bulk_load {host} {}", remote_dirs.join(",")))
    }

    async fn drop_keyspace(&self, host: &Host, keyspace: &str) -> anyhow::Result<()> {
        self.call(format!("drop_keyspace {host} {keyspace}"))
    }

    async fn create_schema(&self, host: &Host, remote_schema_file: &str) -> anyhow::Result<()> {
        self.call(format!("create_schema {host} {remote_schema_file}"))
    }
}

#[derive(Debug, Default)]
pub struct FakeExecutor {
    fail_push: Mutex<Vec<String>>,
    pub journal: Journal,
}

impl FakeExecutor {
    pub fn new(journal: Journal) -> Self {
        Self {
            fail_push: Mutex::new(Vec::new()),
            journal,
        }
    }

    pub fn fail_push(&self, pattern: &str) {
        self.fail_push.lock().unwrap().push(pattern.to_string());
    }
}

#[async_trait]
impl RemoteExecutor for FakeExecutor {
    async fn run(&self, host: &Host, command: &str) -> anyhow::Result<String> {
        self.journal.push(format!("run {host} {command}"));
        Ok(String::new())
    }

    async fn upload_file(&self, host: &Host, local: &Path, remote_dir: &str) -> anyhow::Result<()> {
        if self.fail_push.lock().unwrap().iter().any(|p| remote_dir.contains(p.as_str())) {
            anyhow::bail!("injected push failure");
        }
        let name = local.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        self.journal.push(format!("push {host} {remote_dir}/{name}"));
        Ok(())
    }

    async fn download_file(&self, host: &Host, remote_path: &str, local_dir: &Path) -> anyhow::Result<PathBuf> {
        self.journal.push(format!("fetch {host} {remote_path}"));
        let name = remote_path.rsplit('/').next().unwrap_or(remote_path);
        Ok(local_dir.join(name))
    }
}

/// Fakes wired to one journal.
pub struct Fixture {
    pub journal: Journal,
    pub store: Arc<MemoryStore>,
    pub driver: Arc<FakeDriver>,
    pub executor: Arc<FakeExecutor>,
}

impl Fixture {
    pub fn new(hosts: &[&str]) -> Self {
        let journal = Journal::default();
        Self {
            store: Arc::new(MemoryStore::with_journal(journal.clone())),
            driver: Arc::new(FakeDriver::new(hosts, journal.clone())),
            executor: Arc::new(FakeExecutor::new(journal.clone())),
            journal,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            driver: self.driver.clone(),
            executor: self.executor.clone(),
            store: self.store.clone(),
        }
    }
}
