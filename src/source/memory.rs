//! In-memory work source for tests and local runs.
//!
//! Listing mode returns every pending item sorted by key. Queue mode
//! returns at most `batch_size` items in insertion order, and unacknowledged
//! items are visible again on the next poll. Deferred queue items stay
//! hidden until a poll finds nothing else visible, which stands in for a
//! visibility timeout running out.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{AckHandle, PendingItem, WorkSource};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy)]
enum Mode {
    Listing,
    Queue { batch_size: usize },
}

#[derive(Default)]
struct Inner {
    /// Listing keys or zero-padded message ids; both sort in delivery order.
    pending: BTreeMap<String, (AckHandle, Vec<u8>)>,
    dead: Vec<PendingItem>,
    deferred: BTreeSet<String>,
    next_msg_id: i64,
}

pub struct MemorySource {
    mode: Mode,
    inner: Mutex<Inner>,
    polls: AtomicUsize,
    fail_acks: AtomicBool,
    fail_dead_letters: AtomicBool,
}

impl MemorySource {
    pub fn listing() -> Self {
        Self::with_mode(Mode::Listing)
    }

    pub fn queue(batch_size: usize) -> Self {
        Self::with_mode(Mode::Queue {
            batch_size: batch_size.max(1),
        })
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            inner: Mutex::new(Inner::default()),
            polls: AtomicUsize::new(0),
            fail_acks: AtomicBool::new(false),
            fail_dead_letters: AtomicBool::new(false),
        }
    }

    /// Add a pending item. In listing mode `key` orders delivery; in queue
    /// mode it is ignored and a message id is assigned.
    pub async fn push(&self, key: &str, payload: impl Into<Vec<u8>>) -> AckHandle {
        let mut inner = self.inner.lock().await;
        let (slot, handle) = match self.mode {
            Mode::Listing => (key.to_string(), AckHandle::Key(key.to_string())),
            Mode::Queue { .. } => {
                inner.next_msg_id += 1;
                let id = inner.next_msg_id;
                (format!("{id:020}"), AckHandle::Message(id))
            }
        };
        inner
            .pending
            .insert(slot, (handle.clone(), payload.into()));
        handle
    }

    /// Handles still pending, in delivery order.
    pub async fn pending(&self) -> Vec<AckHandle> {
        let inner = self.inner.lock().await;
        inner.pending.values().map(|(h, _)| h.clone()).collect()
    }

    pub async fn dead_lettered(&self) -> Vec<AckHandle> {
        let inner = self.inner.lock().await;
        inner.dead.iter().map(|item| item.handle.clone()).collect()
    }

    /// Number of polls served so far.
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    /// Make every acknowledgment fail until reset.
    pub fn set_fail_acks(&self, fail: bool) {
        self.fail_acks.store(fail, Ordering::SeqCst);
    }

    /// Make every dead-letter move fail until reset.
    pub fn set_fail_dead_letters(&self, fail: bool) {
        self.fail_dead_letters.store(fail, Ordering::SeqCst);
    }

    fn slot_for(handle: &AckHandle) -> String {
        match handle {
            AckHandle::Key(key) => key.clone(),
            AckHandle::Message(id) => format!("{id:020}"),
        }
    }
}

#[async_trait]
impl WorkSource for MemorySource {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn poll(&self) -> Result<Vec<PendingItem>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().await;
        let limit = match self.mode {
            Mode::Listing => usize::MAX,
            Mode::Queue { batch_size } => batch_size,
        };
        let items: Vec<PendingItem> = inner
            .pending
            .iter()
            .filter(|(slot, _)| !inner.deferred.contains(*slot))
            .take(limit)
            .map(|(_, (handle, payload))| PendingItem::new(handle.clone(), payload.clone()))
            .collect();
        if items.is_empty() {
            inner.deferred.clear();
        }
        Ok(items)
    }

    async fn acknowledge(&self, item: &PendingItem) -> Result<()> {
        if self.fail_acks.load(Ordering::SeqCst) {
            return Err(Error::Other(format!("injected ack failure for {}", item.handle)));
        }
        let slot = Self::slot_for(&item.handle);
        let mut inner = self.inner.lock().await;
        inner.pending.remove(&slot);
        inner.deferred.remove(&slot);
        Ok(())
    }

    async fn dead_letter(&self, item: &PendingItem) -> Result<()> {
        if self.fail_dead_letters.load(Ordering::SeqCst) {
            return Err(Error::Other(format!(
                "injected dead-letter failure for {}",
                item.handle
            )));
        }
        let slot = Self::slot_for(&item.handle);
        let mut inner = self.inner.lock().await;
        inner.deferred.remove(&slot);
        if inner.pending.remove(&slot).is_some() {
            inner.dead.push(item.clone());
        }
        Ok(())
    }

    async fn defer(&self, item: &PendingItem) -> Result<()> {
        if let Mode::Queue { .. } = self.mode {
            let slot = Self::slot_for(&item.handle);
            let mut inner = self.inner.lock().await;
            if inner.pending.contains_key(&slot) {
                inner.deferred.insert(slot);
            }
        }
        Ok(())
    }
}
