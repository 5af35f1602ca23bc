//! # widget-consumer
//!
//! Drains pending widget change-requests from a work source (pgmq queue or
//! a directory listing) and applies them to a storage backend (flat object
//! store or attribute table), acknowledging each request only after it has
//! been applied.

pub mod backend;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod path;
pub mod projection;
pub mod source;
pub mod store;
pub mod telemetry;

pub use consumer::{Consumer, ConsumerConfig, DecodeFailurePolicy, DrainReport};
pub use dispatch::Dispatcher;
pub use error::{Error, Result};
pub use model::{Attribute, ChangeRequest, Operation};
