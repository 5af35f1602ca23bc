//! Flat object backend: the request document stored as JSON at a path.

use std::sync::Arc;

use tracing::info;

use super::Disposition;
use crate::error::Result;
use crate::model::Operation;
use crate::store::ObjectStore;

pub struct FlatBackend {
    store: Arc<dyn ObjectStore>,
}

impl FlatBackend {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Write the body at `path`, replacing whatever is there.
    pub async fn create(&self, path: &str, body: &[u8]) -> Result<Disposition> {
        self.store.write(path, body).await?;
        info!(path, "widget stored");
        Ok(Disposition::Applied(Operation::Create))
    }

    /// Same write as create; the flat store has no partial update.
    pub async fn update(&self, path: &str, body: &[u8]) -> Result<Disposition> {
        self.store.write(path, body).await?;
        info!(path, "widget replaced");
        Ok(Disposition::Applied(Operation::Update))
    }

    pub async fn delete(&self, path: &str) -> Result<Disposition> {
        self.store.remove(path).await?;
        info!(path, "widget removed");
        Ok(Disposition::Applied(Operation::Delete))
    }
}
