//! Error types for widget-consumer.

use thiserror::Error;

use crate::codec::DecodeError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("widget already exists: {0}")]
    AlreadyExists(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether retrying the same payload can never succeed.
    ///
    /// Poison items are routed to the dead-letter sink (when the policy allows)
    /// instead of being left pending.
    pub fn is_poison(&self) -> bool {
        matches!(self, Error::Decode(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
