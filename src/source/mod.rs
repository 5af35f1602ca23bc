//! Pending work sources: where unconsumed change requests live.
//!
//! A source yields raw payloads together with the handle needed to remove
//! them. Removal happens only after the request has been applied, so every
//! source gives at-least-once delivery.

pub mod directory;
pub mod memory;
pub mod pgmq;

pub use directory::DirectorySource;
pub use memory::MemorySource;
pub use pgmq::PgmqSource;

use crate::error::Result;
use async_trait::async_trait;

/// Identifies a pending item within its source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AckHandle {
    /// A broker message id.
    Message(i64),
    /// An object key in a listing.
    Key(String),
}

impl std::fmt::Display for AckHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AckHandle::Message(id) => write!(f, "msg:{id}"),
            AckHandle::Key(key) => f.write_str(key),
        }
    }
}

/// One pending item returned by a poll.
#[derive(Debug, Clone)]
pub struct PendingItem {
    pub handle: AckHandle,
    pub payload: Vec<u8>,
}

impl PendingItem {
    pub fn new(handle: AckHandle, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            handle,
            payload: payload.into(),
        }
    }
}

#[async_trait]
pub trait WorkSource: Send + Sync {
    /// Short name used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Fetch the currently pending items. An empty vec means nothing is pending.
    async fn poll(&self) -> Result<Vec<PendingItem>>;

    /// Remove an item that has been applied.
    async fn acknowledge(&self, item: &PendingItem) -> Result<()>;

    /// Move an item that can never be applied out of the pending set.
    async fn dead_letter(&self, item: &PendingItem) -> Result<()>;

    /// Keep a failed item pending but out of the next polls, so items
    /// queued behind it become visible. Listing sources return every
    /// pending item on each poll and need nothing here.
    async fn defer(&self, _item: &PendingItem) -> Result<()> {
        Ok(())
    }
}
