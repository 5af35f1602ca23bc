//! In-memory stores for tests and dry runs.
//!
//! Both stores count mutations and can be told to fail every call, which is
//! how tests observe that a failed mutation leaves its item pending.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{AttributeStore, ObjectStore, WriteMode};
use crate::error::{Error, Result};
use crate::projection::{Instruction, Instructions, Record};

#[derive(Default)]
struct Faults {
    failing: AtomicBool,
    writes: AtomicUsize,
}

impl Faults {
    fn check(&self, op: &str, target: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(Error::Backend(format!("injected {op} failure for {target}")))
        } else {
            Ok(())
        }
    }

    fn count_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Object store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    faults: Faults,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.lock().await.get(path).cloned()
    }

    /// The object at `path` parsed as JSON.
    pub async fn get_json(&self, path: &str) -> Option<serde_json::Value> {
        let body = self.get(path).await?;
        serde_json::from_slice(&body).ok()
    }

    pub async fn paths(&self) -> Vec<String> {
        self.objects.lock().await.keys().cloned().collect()
    }

    pub fn set_failing(&self, failing: bool) {
        self.faults.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of successful mutating calls.
    pub fn writes(&self) -> usize {
        self.faults.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn write(&self, path: &str, body: &[u8]) -> Result<()> {
        self.faults.check("write", path)?;
        self.objects
            .lock()
            .await
            .insert(path.to_string(), body.to_vec());
        self.faults.count_write();
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.faults.check("remove", path)?;
        self.objects.lock().await.remove(path);
        self.faults.count_write();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Attribute store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryAttributeStore {
    rows: Mutex<BTreeMap<String, Record>>,
    faults: Faults,
}

impl MemoryAttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<Record> {
        self.rows.lock().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }

    pub fn set_failing(&self, failing: bool) {
        self.faults.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of successful mutating calls.
    pub fn writes(&self) -> usize {
        self.faults.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AttributeStore for MemoryAttributeStore {
    async fn put_record(&self, key: &str, record: &Record, mode: WriteMode) -> Result<()> {
        self.faults.check("put", key)?;
        let mut rows = self.rows.lock().await;
        if mode == WriteMode::IfAbsent && rows.contains_key(key) {
            return Err(Error::AlreadyExists(key.to_string()));
        }
        rows.insert(key.to_string(), record.clone());
        self.faults.count_write();
        Ok(())
    }

    async fn apply_update(&self, key: &str, instructions: &Instructions) -> Result<()> {
        self.faults.check("update", key)?;
        let mut rows = self.rows.lock().await;
        let row = rows.entry(key.to_string()).or_default();
        for (name, instruction) in instructions {
            match instruction {
                Instruction::Set(value) => {
                    row.insert(name.clone(), value.clone());
                }
                Instruction::Delete => {
                    row.remove(name);
                }
            }
        }
        self.faults.count_write();
        Ok(())
    }

    async fn remove_record(&self, key: &str) -> Result<()> {
        self.faults.check("remove", key)?;
        self.rows.lock().await.remove(key);
        self.faults.count_write();
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.faults.check("exists", key)?;
        Ok(self.rows.lock().await.contains_key(key))
    }
}
