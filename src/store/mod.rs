//! Storage engines the backend adapters write through.
//!
//! Two shapes: an object store addressed by hierarchical path holding
//! opaque bodies, and an attribute store addressed by primary key holding
//! name/value rows with partial updates. Removing something that is not
//! there succeeds for both.

pub mod fs;
pub mod memory;
pub mod postgres;

pub use fs::FsObjectStore;
pub use memory::{MemoryAttributeStore, MemoryObjectStore};
pub use postgres::PgAttributeStore;

use crate::error::Result;
use crate::projection::{Instructions, Record};
use async_trait::async_trait;

/// How a record put treats an existing row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace any existing row.
    #[default]
    Overwrite,
    /// Fail with [`crate::error::Error::AlreadyExists`] if the row exists.
    IfAbsent,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `body` at `path`, replacing any existing object.
    async fn write(&self, path: &str, body: &[u8]) -> Result<()>;

    /// Remove the object at `path`. Missing objects are not an error.
    async fn remove(&self, path: &str) -> Result<()>;
}

#[async_trait]
pub trait AttributeStore: Send + Sync {
    async fn put_record(&self, key: &str, record: &Record, mode: WriteMode) -> Result<()>;

    /// Apply set/delete instructions to an existing row.
    async fn apply_update(&self, key: &str, instructions: &Instructions) -> Result<()>;

    /// Remove the row. Missing rows are not an error.
    async fn remove_record(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;
}
