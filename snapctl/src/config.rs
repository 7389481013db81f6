//! Configuration management for snapctl.
//!
//! Loads configuration from a TOML file; a few settings can be overridden
//! from the environment (or a `.env` file).

use crate::utils::errors::{CtlError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub restore: RestoreConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Keyspace to back up or restore
    pub keyspace: String,

    /// Cluster nodes, in the order they are processed
    pub hosts: Vec<String>,

    /// Cassandra data directory on each node
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_nodetool")]
    pub nodetool_path: String,

    #[serde(default = "default_cqlsh")]
    pub cqlsh_path: String,

    #[serde(default = "default_sstableloader")]
    pub sstableloader_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default = "default_ssh_user")]
    pub user: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Private key file; falls back to password, then to the SSH agent
    #[serde(default)]
    pub private_key: Option<PathBuf>,

    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory backing the object store (a mounted bucket or shared volume)
    pub root: PathBuf,

    /// Key prefix above the keyspace
    #[serde(default = "default_base_path")]
    pub base_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(default)]
    pub incremental: bool,

    /// Hosts backed up at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreConfig {
    /// Staging root, used locally and on the nodes
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Node that receives the restored data (first host if unset)
    #[serde(default)]
    pub target_host: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_data_dir() -> String {
    "/var/lib/cassandra/data".to_string()
}

fn default_nodetool() -> String {
    "nodetool".to_string()
}

fn default_cqlsh() -> String {
    "cqlsh".to_string()
}

fn default_sstableloader() -> String {
    "sstableloader".to_string()
}

fn default_ssh_user() -> String {
    "cassandra".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_base_path() -> String {
    "cassandra-backups".to_string()
}

fn default_concurrency() -> usize {
    1
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("/tmp/snapctl")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_ssh_user(),
            port: default_ssh_port(),
            private_key: None,
            password: None,
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            incremental: false,
            concurrency: default_concurrency(),
        }
    }
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            target_host: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override selected fields from `SNAPCTL_*` variables.
    pub fn apply_env_overrides(&mut self) {
        let _ = dotenvy::dotenv();

        if let Ok(password) = std::env::var("SNAPCTL_SSH_PASSWORD") {
            self.ssh.password = Some(password);
        }
        if let Ok(level) = std::env::var("SNAPCTL_LOG_LEVEL") {
            self.log.level = level;
        }
        if let Ok(keyspace) = std::env::var("SNAPCTL_KEYSPACE") {
            self.cluster.keyspace = keyspace;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let keyspace = &self.cluster.keyspace;
        if keyspace.is_empty() || !keyspace.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(CtlError::Config(format!("invalid keyspace name {keyspace:?}")));
        }
        if self.cluster.hosts.iter().any(|h| h.is_empty() || h.contains('/')) {
            return Err(CtlError::Config("host names must be non-empty and contain no '/'".into()));
        }
        if self.backup.concurrency == 0 {
            return Err(CtlError::Config("backup.concurrency must be at least 1".into()));
        }
        Ok(())
    }

    /// Where downloaded objects are staged before they are pushed to a node.
    pub fn local_staging(&self) -> PathBuf {
        self.restore.temp_dir.join("local")
    }

    /// Where pushed files land on the node.
    pub fn remote_staging(&self) -> String {
        format!("{}/remote", self.restore.temp_dir.display())
    }

    /// Where snapshot files are pulled to before upload.
    pub fn snapshot_staging(&self) -> PathBuf {
        self.restore.temp_dir.join("snapshots")
    }
}
