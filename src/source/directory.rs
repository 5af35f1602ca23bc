//! Listing-based work source over a directory of request files.
//!
//! Each regular file is one pending request; its file name is the key.
//! Polls return every file in ascending key order, so producers that want
//! same-widget requests applied in order must name files chronologically.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{AckHandle, PendingItem, WorkSource};
use crate::error::{Error, Result};
use crate::telemetry::metrics::record_source_op;

pub struct DirectorySource {
    dir: PathBuf,
    dead_letter_dir: PathBuf,
}

impl DirectorySource {
    /// Dead-lettered files go to `<dir>/.dead-letter`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let dead_letter_dir = dir.join(".dead-letter");
        Self {
            dir,
            dead_letter_dir,
        }
    }

    pub fn with_dead_letter_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dead_letter_dir = dir.into();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn dead_letter_dir(&self) -> &Path {
        &self.dead_letter_dir
    }

    /// Sorted keys of the regular, non-hidden files in the directory.
    async fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                debug!(path = %entry.path().display(), "skipping non-UTF-8 file name");
                continue;
            };
            if !name.starts_with('.') {
                keys.push(name);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn key<'a>(&self, item: &'a PendingItem) -> Result<&'a str> {
        match item.handle {
            AckHandle::Key(ref key) => Ok(key.as_str()),
            AckHandle::Message(id) => Err(Error::Other(format!(
                "directory source given a message id {id}"
            ))),
        }
    }
}

#[async_trait]
impl WorkSource for DirectorySource {
    fn name(&self) -> &'static str {
        "directory"
    }

    async fn poll(&self) -> Result<Vec<PendingItem>> {
        let keys = self.list_keys().await?;
        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            match tokio::fs::read(self.dir.join(&key)).await {
                Ok(payload) => items.push(PendingItem::new(AckHandle::Key(key), payload)),
                // Removed between listing and fetch; another consumer took it.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        record_source_op(self.name(), if items.is_empty() { "poll_empty" } else { "poll" });
        Ok(items)
    }

    async fn acknowledge(&self, item: &PendingItem) -> Result<()> {
        let key = self.key(item)?;
        match tokio::fs::remove_file(self.dir.join(key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        record_source_op(self.name(), "ack");
        Ok(())
    }

    async fn dead_letter(&self, item: &PendingItem) -> Result<()> {
        let key = self.key(item)?;
        tokio::fs::create_dir_all(&self.dead_letter_dir).await?;
        tokio::fs::rename(self.dir.join(key), self.dead_letter_dir.join(key)).await?;
        record_source_op(self.name(), "dead_letter");
        Ok(())
    }
}
