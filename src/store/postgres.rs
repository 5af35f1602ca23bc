//! Attribute store over a Postgres table.
//!
//! Rows are `(id text primary key, attributes jsonb)`. Partial updates run
//! as a single statement: removed keys are subtracted from the jsonb object
//! and set keys are merged over it.

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{AttributeStore, WriteMode};
use crate::db::{Db, validate_identifier};
use crate::error::{Error, Result};
use crate::projection::{Instruction, Instructions, Record};
use crate::telemetry::metrics::record_store_op;

pub struct PgAttributeStore {
    db: Db,
    table: String,
}

impl PgAttributeStore {
    pub fn new(db: Db, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_identifier(&table)?;
        Ok(Self { db, table })
    }

    /// Create the table if it does not exist.
    pub async fn ensure_table(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id          TEXT PRIMARY KEY,
                attributes  JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
            self.table
        );
        sqlx::query(&sql).execute(self.db.pool()).await?;
        Ok(())
    }

    /// Fetch a row's attributes.
    pub async fn get_record(&self, key: &str) -> Result<Option<Record>> {
        let sql = format!("SELECT attributes FROM {} WHERE id = $1", self.table);
        let row: Option<(Value,)> = sqlx::query_as(&sql)
            .bind(key)
            .fetch_optional(self.db.pool())
            .await?;
        row.map(|(attributes,)| serde_json::from_value(attributes).map_err(Error::from))
            .transpose()
    }
}

/// Split instructions into the keys to drop and the object to merge.
fn split_instructions(instructions: &Instructions) -> (Vec<String>, Value) {
    let mut removed = Vec::new();
    let mut set = Map::new();
    for (name, instruction) in instructions {
        match instruction {
            Instruction::Delete => removed.push(name.clone()),
            Instruction::Set(value) => {
                set.insert(name.clone(), Value::String(value.clone()));
            }
        }
    }
    (removed, Value::Object(set))
}

#[async_trait]
impl AttributeStore for PgAttributeStore {
    async fn put_record(&self, key: &str, record: &Record, mode: WriteMode) -> Result<()> {
        let attributes = serde_json::to_value(record)?;
        match mode {
            WriteMode::Overwrite => {
                let sql = format!(
                    "INSERT INTO {} (id, attributes, updated_at) VALUES ($1, $2, now())
                     ON CONFLICT (id) DO UPDATE
                     SET attributes = EXCLUDED.attributes, updated_at = now()",
                    self.table
                );
                sqlx::query(&sql)
                    .bind(key)
                    .bind(&attributes)
                    .execute(self.db.pool())
                    .await?;
            }
            WriteMode::IfAbsent => {
                let sql = format!(
                    "INSERT INTO {} (id, attributes, updated_at) VALUES ($1, $2, now())
                     ON CONFLICT (id) DO NOTHING
                     RETURNING id",
                    self.table
                );
                let inserted: Option<(String,)> = sqlx::query_as(&sql)
                    .bind(key)
                    .bind(&attributes)
                    .fetch_optional(self.db.pool())
                    .await?;
                if inserted.is_none() {
                    return Err(Error::AlreadyExists(key.to_string()));
                }
            }
        }
        record_store_op("postgres", "put");
        Ok(())
    }

    async fn apply_update(&self, key: &str, instructions: &Instructions) -> Result<()> {
        if instructions.is_empty() {
            return Ok(());
        }
        let (removed, set) = split_instructions(instructions);
        let sql = format!(
            "UPDATE {} SET attributes = (attributes - $2::text[]) || $3::jsonb, updated_at = now()
             WHERE id = $1",
            self.table
        );
        sqlx::query(&sql)
            .bind(key)
            .bind(&removed)
            .bind(&set)
            .execute(self.db.pool())
            .await?;
        record_store_op("postgres", "update");
        Ok(())
    }

    async fn remove_record(&self, key: &str) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE id = $1", self.table);
        sqlx::query(&sql).bind(key).execute(self.db.pool()).await?;
        record_store_op("postgres", "remove");
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1)", self.table);
        let (found,): (bool,) = sqlx::query_as(&sql)
            .bind(key)
            .fetch_one(self.db.pool())
            .await?;
        record_store_op("postgres", "exists");
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_instructions_separates_deletes_from_sets() {
        let mut instructions = Instructions::new();
        instructions.insert("color".into(), Instruction::Set("blue".into()));
        instructions.insert("size".into(), Instruction::Delete);

        let (removed, set) = split_instructions(&instructions);
        assert_eq!(removed, vec!["size".to_string()]);
        assert_eq!(set, serde_json::json!({"color": "blue"}));
    }
}
