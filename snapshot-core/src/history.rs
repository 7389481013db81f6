//! Snapshot history derived from the object-store key namespace.
//!
//! There is no index file: one listing of the keyspace prefix is parsed into
//! generations, each identified by its timestamp and linked to its parent.
//! A history is loaded once per run and is read-only afterwards.

use crate::collab::ObjectStore;
use crate::error::{Error, Result};
use crate::host::Host;
use crate::keys::{KeyNamespace, ParsedKey};
use crate::timestamp::Timestamp;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

/// One backup generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotRecord {
    pub timestamp: Timestamp,
    pub parent: Timestamp,
    pub keyspace: String,
    /// Schema artifact, absent if the run died before uploading it.
    pub schema_key: Option<String>,
    /// Hosts that uploaded at least one data file.
    pub hosts: BTreeSet<Host>,
    #[serde(skip)]
    pub data_keys: BTreeSet<String>,
}

impl SnapshotRecord {
    pub fn is_full(&self) -> bool {
        self.parent == self.timestamp
    }

    pub fn kind(&self) -> &'static str {
        if self.is_full() {
            "full"
        } else {
            "incremental"
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotHistory {
    namespace: KeyNamespace,
    records: BTreeMap<Timestamp, SnapshotRecord>,
}

impl SnapshotHistory {
    pub fn empty(namespace: KeyNamespace) -> Self {
        Self {
            namespace,
            records: BTreeMap::new(),
        }
    }

    /// List the keyspace prefix once and build the history from it.
    pub async fn load(store: &dyn ObjectStore, namespace: &KeyNamespace) -> Result<Self> {
        let prefix = namespace.prefix();
        let keys = store.list(&prefix).await.map_err(Error::HistoryUnavailable)?;
        debug!(prefix = %prefix, keys = keys.len(), "Listed snapshot keys");
        Self::from_keys(namespace.clone(), keys)
    }

    /// Build a history from an already fetched key listing.
    ///
    /// Keys that do not follow the namespace layout are rejected rather than
    /// skipped, as are keys whose parent sorts after their own timestamp and
    /// generations seen with two different parents.
    pub fn from_keys<I, S>(namespace: KeyNamespace, keys: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut history = Self::empty(namespace);
        for key in keys {
            history.insert_key(key.as_ref())?;
        }
        Ok(history)
    }

    fn insert_key(&mut self, key: &str) -> Result<()> {
        let malformed = |reason: String| Error::MalformedKey {
            key: key.to_string(),
            reason,
        };

        let parsed = self.namespace.parse(key).map_err(|e| malformed(e.to_string()))?;
        let (parent, timestamp) = (parsed.parent().clone(), parsed.timestamp().clone());
        if parent > timestamp {
            return Err(malformed(format!("parent {parent} is after {timestamp}")));
        }

        let keyspace = self.namespace.keyspace().to_string();
        let record = self
            .records
            .entry(timestamp.clone())
            .or_insert_with(|| SnapshotRecord {
                timestamp: timestamp.clone(),
                parent: parent.clone(),
                keyspace,
                schema_key: None,
                hosts: BTreeSet::new(),
                data_keys: BTreeSet::new(),
            });
        if record.parent != parent {
            return Err(malformed(format!(
                "{timestamp} already has parent {}, found {parent}",
                record.parent
            )));
        }

        match parsed {
            ParsedKey::Schema { .. } => record.schema_key = Some(key.to_string()),
            ParsedKey::Data { host, .. } => {
                record.hosts.insert(host);
                record.data_keys.insert(key.to_string());
            }
        }
        Ok(())
    }

    pub fn namespace(&self) -> &KeyNamespace {
        &self.namespace
    }

    /// Timestamps in ascending order.
    pub fn list(&self) -> Vec<Timestamp> {
        self.records.keys().cloned().collect()
    }

    pub fn latest(&self) -> Option<&Timestamp> {
        self.records.keys().next_back()
    }

    pub fn valid(&self, ts: &str) -> bool {
        self.records.contains_key(ts)
    }

    pub fn get(&self, ts: &str) -> Option<&SnapshotRecord> {
        self.records.get(ts)
    }

    pub fn records(&self) -> impl Iterator<Item = &SnapshotRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Immediate parent; a full backup is its own parent.
    pub fn parent(&self, ts: &Timestamp) -> Result<Timestamp> {
        self.get(ts.as_str())
            .map(|r| r.parent.clone())
            .ok_or_else(|| Error::UnknownSnapshot(ts.clone()))
    }

    /// `ts` followed by each ancestor, ending with the full backup.
    pub fn chain(&self, ts: &Timestamp) -> Result<Vec<Timestamp>> {
        if !self.valid(ts.as_str()) {
            return Err(Error::UnknownSnapshot(ts.clone()));
        }

        // parents always sort before their child, so the walk terminates
        let mut chain = Vec::new();
        let mut current = ts.clone();
        loop {
            let record = self.get(current.as_str()).ok_or_else(|| Error::ChainBroken {
                snapshot: ts.clone(),
                missing: current.clone(),
            })?;
            chain.push(current.clone());
            if record.is_full() {
                return Ok(chain);
            }
            current = record.parent.clone();
        }
    }

    /// Every data key needed to restore `ts`, mapped to its staging path.
    ///
    /// Keys carry their generation prefix, so files with the same name in
    /// different generations stay distinct entries.
    pub fn keys(&self, ts: &Timestamp) -> Result<BTreeMap<String, PathBuf>> {
        let mut keys = BTreeMap::new();
        for generation in self.chain(ts)? {
            if let Some(record) = self.get(generation.as_str()) {
                for key in &record.data_keys {
                    keys.insert(key.clone(), PathBuf::from(key));
                }
            }
        }
        Ok(keys)
    }
}

impl fmt::Display for SnapshotHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.records.is_empty() {
            return writeln!(f, "no backups for keyspace {}", self.namespace.keyspace());
        }
        writeln!(
            f,
            "{:<19} {:<19} {:<12} {:>5} {:>7}  {}",
            "TIMESTAMP", "PARENT", "TYPE", "HOSTS", "FILES", "SCHEMA"
        )?;
        for r in self.records.values() {
            writeln!(
                f,
                "{:<19} {:<19} {:<12} {:>5} {:>7}  {}",
                r.timestamp,
                r.parent,
                r.kind(),
                r.hosts.len(),
                r.data_keys.len(),
                if r.schema_key.is_some() { "yes" } else { "missing" }
            )?;
        }
        Ok(())
    }
}
