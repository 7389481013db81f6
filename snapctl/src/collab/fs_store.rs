//! Object store backed by a directory tree.
//!
//! Keys map one-to-one onto relative paths under `root`, so a mounted bucket
//! or shared volume can serve as durable storage. Uploads are written to a
//! `.partial` sibling and renamed into place; listings never show them.

use crate::utils::errors::CtlError;
use anyhow::Context;
use async_trait::async_trait;
use snapshot_core::ObjectStore;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

const PARTIAL_SUFFIX: &str = ".partial";

#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative path for `key`, refusing anything that could escape `root`.
    fn key_path(key: &str) -> Result<PathBuf, CtlError> {
        let invalid = |reason| CtlError::InvalidKey {
            key: key.to_string(),
            reason,
        };
        if key.is_empty() {
            return Err(invalid("empty key"));
        }
        if key.ends_with(PARTIAL_SUFFIX) {
            return Err(invalid("reserved suffix"));
        }
        let path = PathBuf::from(key);
        for component in path.components() {
            match component {
                Component::Normal(_) => {}
                _ => return Err(invalid("only plain path segments are allowed")),
            }
        }
        Ok(path)
    }
}

fn list_blocking(root: &Path, prefix: &str) -> anyhow::Result<Vec<String>> {
    // walk only the deepest directory the prefix fully names
    let start = match prefix.rsplit_once('/') {
        Some((dir, _)) => root.join(dir),
        None => root.to_path_buf(),
    };
    if !start.exists() {
        return Ok(Vec::new());
    }

    let mut keys = Vec::new();
    for entry in WalkDir::new(&start).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .context("walked outside store root")?;
        let key = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if key.starts_with(prefix) && !key.ends_with(PARTIAL_SUFFIX) {
            keys.push(key);
        }
    }
    keys.sort();
    Ok(keys)
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn upload(&self, local: &Path, key: &str) -> anyhow::Result<()> {
        let dest = self.root.join(Self::key_path(key)?);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut partial = dest.clone().into_os_string();
        partial.push(PARTIAL_SUFFIX);

        tokio::fs::copy(local, &partial)
            .await
            .with_context(|| format!("copying {} into store", local.display()))?;
        tokio::fs::rename(&partial, &dest).await?;
        tracing::debug!(key, "Stored object");
        Ok(())
    }

    async fn download(&self, key: &str, local_dir: &Path) -> anyhow::Result<PathBuf> {
        let rel = Self::key_path(key)?;
        let source = self.root.join(&rel);
        let dest = local_dir.join(&rel);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&source, &dest)
            .await
            .with_context(|| format!("fetching {key}"))?;
        Ok(dest)
    }

    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || list_blocking(&root, &prefix)).await?
    }
}
