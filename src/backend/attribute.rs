//! Attribute backend: widgets as keyed attribute rows.

use std::sync::Arc;

use tracing::{info, warn};

use super::Disposition;
use crate::error::Result;
use crate::model::Operation;
use crate::projection::{Instructions, Record};
use crate::store::{AttributeStore, WriteMode};

pub struct AttributeBackend {
    store: Arc<dyn AttributeStore>,
    create_mode: WriteMode,
}

impl AttributeBackend {
    pub fn new(store: Arc<dyn AttributeStore>) -> Self {
        Self {
            store,
            create_mode: WriteMode::Overwrite,
        }
    }

    /// Make creates fail when the row already exists.
    pub fn with_create_mode(mut self, mode: WriteMode) -> Self {
        self.create_mode = mode;
        self
    }

    pub async fn create(&self, key: &str, record: &Record) -> Result<Disposition> {
        self.store.put_record(key, record, self.create_mode).await?;
        info!(key, attributes = record.len(), "widget row written");
        Ok(Disposition::Applied(Operation::Create))
    }

    /// Apply instructions to an existing row.
    ///
    /// A missing row is skipped rather than created, so a stale update can
    /// never bring back a deleted widget.
    pub async fn update(&self, key: &str, instructions: &Instructions) -> Result<Disposition> {
        if !self.store.exists(key).await? {
            warn!(key, "update for missing widget skipped");
            return Ok(Disposition::Skipped {
                reason: format!("widget {key} does not exist"),
            });
        }
        self.store.apply_update(key, instructions).await?;
        info!(key, instructions = instructions.len(), "widget row updated");
        Ok(Disposition::Applied(Operation::Update))
    }

    pub async fn delete(&self, key: &str) -> Result<Disposition> {
        self.store.remove_record(key).await?;
        info!(key, "widget row removed");
        Ok(Disposition::Applied(Operation::Delete))
    }
}
