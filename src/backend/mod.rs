//! Backend adapters: apply one create/update/delete to a storage engine.
//!
//! Exactly one adapter is active per run. The adapters take already-derived
//! paths and projections; deriving them is the dispatcher's job.

pub mod attribute;
pub mod flat;

pub use attribute::AttributeBackend;
pub use flat::FlatBackend;

use crate::model::Operation;

/// The active storage backend.
pub enum Backend {
    Flat(FlatBackend),
    Attribute(AttributeBackend),
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Flat(_) => "flat",
            Backend::Attribute(_) => "attribute",
        }
    }
}

/// How a request ended when no error occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The mutation was applied.
    Applied(Operation),
    /// Nothing was written; the request is still considered handled.
    Skipped { reason: String },
}

impl Disposition {
    pub fn label(&self) -> &'static str {
        match self {
            Disposition::Applied(_) => "applied",
            Disposition::Skipped { .. } => "skipped",
        }
    }
}
