//! Object store over a local directory tree.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::ObjectStore;
use crate::error::{Error, Result};
use crate::telemetry::metrics::record_store_op;

/// Objects are files under `root`; the object path maps to a relative file path.
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

    /// Resolve an object path, refusing anything that would escape `root`.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            return Err(Error::Backend(format!("invalid object path {path:?}")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn write(&self, path: &str, body: &[u8]) -> Result<()> {
        let file = self.resolve(path)?;
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write-then-rename so readers never see a partial body.
        let mut tmp = file.clone().into_os_string();
        tmp.push(".partial");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &file).await?;
        record_store_op("fs", "write");
        debug!(path, bytes = body.len(), "object written");
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let file = self.resolve(path)?;
        match tokio::fs::remove_file(&file).await {
            Ok(()) => debug!(path, "object removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path, "object already absent");
            }
            Err(e) => return Err(e.into()),
        }
        record_store_op("fs", "remove");
        Ok(())
    }
}
