//! Object-store key layout.
//!
//! Every artifact of a backup generation lives under
//! `{base}/{keyspace}/{parent}/{timestamp}/`:
//!
//! ```text
//! {base}/{keyspace}/{parent}/{timestamp}/{keyspace}.schema.gz
//! {base}/{keyspace}/{parent}/{timestamp}/{host}/{keyspace}/{table}/{file}
//! ```
//!
//! The layout is the only metadata the system persists. History is rebuilt
//! by parsing it, so it must stay stable across versions.

use crate::host::Host;
use crate::timestamp::Timestamp;

pub const SCHEMA_SUFFIX: &str = ".schema.gz";

/// A key parsed back into its generation coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedKey {
    Schema {
        parent: Timestamp,
        timestamp: Timestamp,
    },
    Data {
        parent: Timestamp,
        timestamp: Timestamp,
        host: Host,
        file: String,
    },
}

impl ParsedKey {
    pub fn parent(&self) -> &Timestamp {
        match self {
            ParsedKey::Schema { parent, .. } | ParsedKey::Data { parent, .. } => parent,
        }
    }

    pub fn timestamp(&self) -> &Timestamp {
        match self {
            ParsedKey::Schema { timestamp, .. } | ParsedKey::Data { timestamp, .. } => timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("outside namespace {0:?}")]
    OutsideNamespace(String),
    #[error("expected {{parent}}/{{timestamp}}/<artifact>")]
    TooShort,
    #[error("empty path segment")]
    EmptySegment,
    #[error("{0}")]
    BadTimestamp(String),
    #[error("data key has no file below host {0:?}")]
    MissingFile(String),
}

/// Key layout for one keyspace under one base path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyNamespace {
    base_path: String,
    keyspace: String,
}

impl KeyNamespace {
    pub fn new(base_path: impl AsRef<str>, keyspace: impl Into<String>) -> Self {
        Self {
            base_path: base_path.as_ref().trim_matches('/').to_string(),
            keyspace: keyspace.into(),
        }
    }

    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Prefix shared by every key of this keyspace, with trailing `/`.
    pub fn prefix(&self) -> String {
        if self.base_path.is_empty() {
            format!("{}/", self.keyspace)
        } else {
            format!("{}/{}/", self.base_path, self.keyspace)
        }
    }

    pub fn generation_prefix(&self, parent: &Timestamp, timestamp: &Timestamp) -> String {
        format!("{}{}/{}/", self.prefix(), parent, timestamp)
    }

    pub fn schema_key(&self, parent: &Timestamp, timestamp: &Timestamp) -> String {
        format!(
            "{}{}{}",
            self.generation_prefix(parent, timestamp),
            self.keyspace,
            SCHEMA_SUFFIX
        )
    }

    /// `file` is the path relative to the node's data directory.
    pub fn data_key(&self, parent: &Timestamp, timestamp: &Timestamp, host: &Host, file: &str) -> String {
        format!(
            "{}{}/{}",
            self.generation_prefix(parent, timestamp),
            host,
            file.trim_start_matches('/')
        )
    }

    pub fn parse(&self, key: &str) -> Result<ParsedKey, KeyError> {
        let rest = key
            .strip_prefix(&self.prefix())
            .ok_or_else(|| KeyError::OutsideNamespace(self.prefix()))?;

        let mut parts = rest.splitn(3, '/');
        let (parent, timestamp, artifact) = match (parts.next(), parts.next(), parts.next()) {
            (Some(p), Some(t), Some(a)) => (p, t, a),
            _ => return Err(KeyError::TooShort),
        };
        if parent.is_empty() || timestamp.is_empty() || artifact.is_empty() {
            return Err(KeyError::EmptySegment);
        }
        let parent = Timestamp::parse(parent).map_err(|e| KeyError::BadTimestamp(e.to_string()))?;
        let timestamp = Timestamp::parse(timestamp).map_err(|e| KeyError::BadTimestamp(e.to_string()))?;

        if artifact == format!("{}{}", self.keyspace, SCHEMA_SUFFIX) {
            return Ok(ParsedKey::Schema { parent, timestamp });
        }

        let (host, file) = artifact
            .split_once('/')
            .ok_or_else(|| KeyError::MissingFile(artifact.to_string()))?;
        if host.is_empty() {
            return Err(KeyError::EmptySegment);
        }
        if file.is_empty() || file.split('/').any(str::is_empty) {
            return Err(KeyError::MissingFile(host.to_string()));
        }

        Ok(ParsedKey::Data {
            parent,
            timestamp,
            host: Host::from(host),
            file: file.to_string(),
        })
    }
}
