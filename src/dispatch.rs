//! Routes a decoded request to the active backend.
//!
//! Derives what each backend needs (object path and document body, or
//! attribute projection) and invokes the matching adapter operation.

use crate::backend::{AttributeBackend, Backend, Disposition, FlatBackend};
use crate::codec::DecodeError;
use crate::error::Result;
use crate::model::{ChangeRequest, Operation};
use crate::path::{is_safe_segment, owner_segment, widget_path};
use crate::projection::{full_projection, partial_projection};

pub struct Dispatcher {
    backend: Backend,
}

impl Dispatcher {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    pub fn flat(backend: FlatBackend) -> Self {
        Self::new(Backend::Flat(backend))
    }

    pub fn attribute(backend: AttributeBackend) -> Self {
        Self::new(Backend::Attribute(backend))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Apply one request. Errors leave the request unapplied.
    pub async fn dispatch(&self, request: &ChangeRequest) -> Result<Disposition> {
        match &self.backend {
            Backend::Flat(flat) => dispatch_flat(flat, request).await,
            Backend::Attribute(attr) => dispatch_attribute(attr, request).await,
        }
    }
}

/// Flat paths are owner-derived, so every operation needs the owner.
async fn dispatch_flat(backend: &FlatBackend, request: &ChangeRequest) -> Result<Disposition> {
    let owner = request
        .non_empty_owner()
        .ok_or(DecodeError::MissingField("owner"))?;
    // A request that can never map to a path is poison, not a backend error.
    check_segment("owner", &owner_segment(owner))?;
    check_segment("widgetId", &request.widget_id)?;
    let path = widget_path(owner, &request.widget_id);

    match request.operation {
        Operation::Create => {
            let body = serde_json::to_vec(&request.document)?;
            backend.create(&path, &body).await
        }
        Operation::Update => {
            let body = serde_json::to_vec(&request.document)?;
            backend.update(&path, &body).await
        }
        Operation::Delete => backend.delete(&path).await,
    }
}

fn check_segment(field: &'static str, segment: &str) -> Result<()> {
    if is_safe_segment(segment) {
        Ok(())
    } else {
        Err(DecodeError::InvalidField {
            field,
            value: segment.to_string(),
        }
        .into())
    }
}

async fn dispatch_attribute(
    backend: &AttributeBackend,
    request: &ChangeRequest,
) -> Result<Disposition> {
    let key = request.widget_id.as_str();

    match request.operation {
        Operation::Create => {
            if request.non_empty_owner().is_none() {
                return Err(DecodeError::MissingField("owner").into());
            }
            backend.create(key, &full_projection(request)).await
        }
        Operation::Update => backend.update(key, &partial_projection(request)).await,
        Operation::Delete => backend.delete(key).await,
    }
}
