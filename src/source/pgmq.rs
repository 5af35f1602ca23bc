//! Queue-based work source backed by pgmq.
//!
//! Calls pgmq's SQL functions: pgmq.create, pgmq.send, pgmq.read,
//! pgmq.archive, pgmq.delete, pgmq.set_vt. Reads hide messages for the visibility
//! timeout, so an unacknowledged message reappears on a later poll.

use async_trait::async_trait;

use super::{AckHandle, PendingItem, WorkSource};
use crate::db::{Db, validate_identifier};
use crate::error::{Error, Result};
use crate::telemetry::metrics::record_source_op;

/// A message read from a pgmq queue.
#[derive(Debug, Clone)]
pub struct PgmqMessage {
    pub msg_id: i64,
    pub read_ct: i32,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
    pub vt: chrono::DateTime<chrono::Utc>,
    pub message: serde_json::Value,
}

/// Settings for a pgmq source.
#[derive(Debug, Clone)]
pub struct PgmqConfig {
    pub queue: String,
    /// Maximum messages per poll.
    pub batch_size: i32,
    /// Seconds a read message stays hidden from other readers.
    pub visibility_timeout: i32,
}

impl PgmqConfig {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            batch_size: 10,
            visibility_timeout: 30,
        }
    }
}

pub struct PgmqSource {
    db: Db,
    config: PgmqConfig,
}

impl PgmqSource {
    pub fn new(db: Db, config: PgmqConfig) -> Result<Self> {
        validate_identifier(&config.queue)?;
        if config.batch_size < 1 {
            return Err(Error::Config(format!(
                "batch size must be positive, got {}",
                config.batch_size
            )));
        }
        if config.visibility_timeout < 1 {
            return Err(Error::Config(format!(
                "visibility timeout must be at least 1 second, got {}",
                config.visibility_timeout
            )));
        }
        Ok(Self { db, config })
    }

    /// Create the queue (idempotent).
    pub async fn create_queue(&self) -> Result<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(&self.config.queue)
            .execute(self.db.pool())
            .await?;
        record_source_op(self.name(), "create");
        Ok(())
    }

    /// Send a message to the queue. Returns the message ID.
    pub async fn send(&self, payload: &serde_json::Value) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2)")
            .bind(&self.config.queue)
            .bind(payload)
            .fetch_one(self.db.pool())
            .await?;
        record_source_op(self.name(), "send");
        Ok(row.0)
    }

    /// Read up to `batch_size` visible messages.
    pub async fn read_batch(&self) -> Result<Vec<PgmqMessage>> {
        let rows = sqlx::query_as::<
            _,
            (
                i64,
                i32,
                chrono::DateTime<chrono::Utc>,
                chrono::DateTime<chrono::Utc>,
                serde_json::Value,
            ),
        >("SELECT msg_id, read_ct, enqueued_at, vt, message FROM pgmq.read($1, $2, $3)")
        .bind(&self.config.queue)
        .bind(self.config.visibility_timeout)
        .bind(self.config.batch_size)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(msg_id, read_ct, enqueued_at, vt, message)| PgmqMessage {
                msg_id,
                read_ct,
                enqueued_at,
                vt,
                message,
            })
            .collect())
    }

    fn message_id(item: &PendingItem) -> Result<i64> {
        match item.handle {
            AckHandle::Message(id) => Ok(id),
            AckHandle::Key(ref key) => Err(Error::Other(format!(
                "pgmq source given a listing key {key:?}"
            ))),
        }
    }
}

#[async_trait]
impl WorkSource for PgmqSource {
    fn name(&self) -> &'static str {
        "pgmq"
    }

    async fn poll(&self) -> Result<Vec<PendingItem>> {
        let messages = self.read_batch().await?;
        record_source_op(
            self.name(),
            if messages.is_empty() { "poll_empty" } else { "poll" },
        );

        messages
            .into_iter()
            .map(|msg| -> Result<PendingItem> {
                // A JSON string message carries the payload text itself.
                let payload = match msg.message {
                    serde_json::Value::String(text) => text.into_bytes(),
                    other => serde_json::to_vec(&other)?,
                };
                Ok(PendingItem::new(AckHandle::Message(msg.msg_id), payload))
            })
            .collect()
    }

    async fn acknowledge(&self, item: &PendingItem) -> Result<()> {
        let msg_id = Self::message_id(item)?;
        sqlx::query("SELECT pgmq.delete($1, $2)")
            .bind(&self.config.queue)
            .bind(msg_id)
            .execute(self.db.pool())
            .await?;
        record_source_op(self.name(), "ack");
        Ok(())
    }

    /// Archive the message; pgmq keeps it in the queue's archive table.
    async fn dead_letter(&self, item: &PendingItem) -> Result<()> {
        let msg_id = Self::message_id(item)?;
        sqlx::query("SELECT pgmq.archive($1, $2)")
            .bind(&self.config.queue)
            .bind(msg_id)
            .execute(self.db.pool())
            .await?;
        record_source_op(self.name(), "dead_letter");
        Ok(())
    }

    /// Hide the message for another visibility timeout.
    async fn defer(&self, item: &PendingItem) -> Result<()> {
        let msg_id = Self::message_id(item)?;
        sqlx::query("SELECT msg_id FROM pgmq.set_vt($1, $2, $3)")
            .bind(&self.config.queue)
            .bind(msg_id)
            .bind(self.config.visibility_timeout)
            .execute(self.db.pool())
            .await?;
        record_source_op(self.name(), "defer");
        Ok(())
    }
}
