//! Consumer loop tests: acknowledgment discipline and drain termination.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;
use widget_consumer::backend::{AttributeBackend, Disposition, FlatBackend};
use widget_consumer::consumer::ItemOutcome;
use widget_consumer::source::{AckHandle, MemorySource, PendingItem, WorkSource};
use widget_consumer::store::{MemoryAttributeStore, MemoryObjectStore};
use widget_consumer::{
    Consumer, ConsumerConfig, DecodeFailurePolicy, Dispatcher, DrainReport, Operation,
};

fn fast_config() -> ConsumerConfig {
    ConsumerConfig {
        idle_pause: Duration::ZERO,
        ..ConsumerConfig::default()
    }
}

fn payload(value: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&value).unwrap()
}

fn attribute_consumer(
    source: Arc<MemorySource>,
    config: ConsumerConfig,
) -> (Arc<MemoryAttributeStore>, Consumer) {
    let store = Arc::new(MemoryAttributeStore::new());
    let dispatcher = Dispatcher::attribute(AttributeBackend::new(store.clone()));
    (store, Consumer::new(source, dispatcher, config))
}

/// Returns a fixed script of poll results, then empty polls forever.
struct ScriptedSource {
    script: Mutex<Vec<Vec<PendingItem>>>,
    polls: AtomicUsize,
    acks: AtomicUsize,
}

impl ScriptedSource {
    fn new(mut script: Vec<Vec<PendingItem>>) -> Self {
        script.reverse();
        Self {
            script: Mutex::new(script),
            polls: AtomicUsize::new(0),
            acks: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl WorkSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn poll(&self) -> widget_consumer::Result<Vec<PendingItem>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(self.script.lock().await.pop().unwrap_or_default())
    }

    async fn acknowledge(&self, _item: &PendingItem) -> widget_consumer::Result<()> {
        self.acks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn dead_letter(&self, _item: &PendingItem) -> widget_consumer::Result<()> {
        Ok(())
    }
}

fn delete_item(key: &str, widget: &str) -> PendingItem {
    PendingItem::new(
        AckHandle::Key(key.to_string()),
        payload(json!({"type": "delete", "widgetId": widget})),
    )
}

// ---------------------------------------------------------------------------
// Termination
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stops_after_two_consecutive_empty_polls() {
    let source = Arc::new(ScriptedSource::new(vec![
        vec![delete_item("a", "w-1"), delete_item("b", "w-2")],
        vec![delete_item("c", "w-3")],
        vec![],
        vec![],
        vec![delete_item("never", "w-4")],
    ]));
    let store = Arc::new(MemoryAttributeStore::new());
    let consumer = Consumer::new(
        source.clone(),
        Dispatcher::attribute(AttributeBackend::new(store)),
        fast_config(),
    );

    let report = consumer.run().await.unwrap();

    assert_eq!(source.polls.load(Ordering::SeqCst), 4);
    assert_eq!(source.acks.load(Ordering::SeqCst), 3);
    assert_eq!(report.polls, 4);
    assert_eq!(report.applied, 3);
}

#[tokio::test]
async fn an_item_between_empty_polls_resets_the_idle_flag() {
    let source = Arc::new(ScriptedSource::new(vec![
        vec![],
        vec![delete_item("a", "w-1")],
        vec![],
        vec![],
    ]));
    let consumer = Consumer::new(
        source.clone(),
        Dispatcher::attribute(AttributeBackend::new(Arc::new(MemoryAttributeStore::new()))),
        fast_config(),
    );

    let report = consumer.run().await.unwrap();

    assert_eq!(report.polls, 4);
    assert_eq!(report.applied, 1);
}

#[tokio::test]
async fn empty_source_polls_twice() {
    let source = Arc::new(MemorySource::listing());
    let (_store, consumer) = attribute_consumer(source.clone(), fast_config());

    let report = consumer.run().await.unwrap();

    assert_eq!(source.polls(), 2);
    assert_eq!(report, DrainReport { polls: 2, ..DrainReport::default() });
}

// ---------------------------------------------------------------------------
// Processing and acknowledgment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn listing_source_applies_in_key_order() {
    let source = Arc::new(MemorySource::listing());
    // Pushed out of order; keys sort create before update before delete.
    source
        .push("003", payload(json!({"type": "update", "widgetId": "w-1", "label": "late"})))
        .await;
    source
        .push(
            "001",
            payload(json!({"type": "create", "widgetId": "w-1", "owner": "Ann", "label": "early"})),
        )
        .await;
    source
        .push("002", payload(json!({"type": "update", "widgetId": "w-1", "label": "middle"})))
        .await;
    let (store, consumer) = attribute_consumer(source.clone(), fast_config());

    let report = consumer.run().await.unwrap();

    assert_eq!(report.applied, 3);
    assert_eq!(store.get("w-1").await.unwrap()["label"], "late");
    assert!(source.pending().await.is_empty());
}

#[tokio::test]
async fn queue_source_is_drained_in_batches() {
    let source = Arc::new(MemorySource::queue(10));
    for i in 0..25 {
        source
            .push(
                "",
                payload(json!({"type": "create", "widgetId": format!("w-{i}"), "owner": "Ann"})),
            )
            .await;
    }
    let (store, consumer) = attribute_consumer(source.clone(), fast_config());

    let report = consumer.run().await.unwrap();

    assert_eq!(report.applied, 25);
    // Three item-bearing polls (10, 10, 5), then two empty ones.
    assert_eq!(report.polls, 5);
    assert_eq!(store.len().await, 25);
}

#[tokio::test]
async fn backend_failure_leaves_item_pending() {
    let source = Arc::new(MemorySource::listing());
    let handle = source
        .push(
            "001",
            payload(json!({"type": "create", "widgetId": "w-1", "owner": "Ann"})),
        )
        .await;
    let objects = Arc::new(MemoryObjectStore::new());
    objects.set_failing(true);
    let consumer = Consumer::new(
        source.clone(),
        Dispatcher::flat(FlatBackend::new(objects.clone())),
        fast_config(),
    );

    let report = consumer.run().await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.applied, 0);
    assert_eq!(source.pending().await, vec![handle.clone()]);
    // Still retrievable by the next poll.
    let next = source.poll().await.unwrap();
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].handle, handle);

    // Once the backend recovers, a fresh run applies and acknowledges it.
    objects.set_failing(false);
    let consumer = Consumer::new(
        source.clone(),
        Dispatcher::flat(FlatBackend::new(objects.clone())),
        fast_config(),
    );
    let report = consumer.run().await.unwrap();
    assert_eq!(report.applied, 1);
    assert!(source.pending().await.is_empty());
    assert!(objects.get("widgets/ann/w-1").await.is_some());
}

#[tokio::test]
async fn failed_item_does_not_block_later_items() {
    let source = Arc::new(MemorySource::listing());
    source
        .push("001", payload(json!({"type": "create", "widgetId": "w-1", "owner": "Ann"})))
        .await;
    source
        .push("002", payload(json!({"type": "create", "widgetId": "w-2", "owner": "Ann"})))
        .await;
    let (store, consumer) = attribute_consumer(source.clone(), fast_config());
    store.set_failing(true);

    let report = consumer.run().await.unwrap();

    // Both fail once, are parked, and the drain still terminates.
    assert_eq!(report.failed, 2);
    assert_eq!(source.pending().await.len(), 2);
}

#[tokio::test]
async fn skipped_update_is_acknowledged() {
    let source = Arc::new(MemorySource::listing());
    source
        .push("001", payload(json!({"type": "update", "widgetId": "ghost", "label": "x"})))
        .await;
    let (store, consumer) = attribute_consumer(source.clone(), fast_config());

    let report = consumer.run().await.unwrap();

    assert_eq!(report.skipped, 1);
    assert!(source.pending().await.is_empty());
    assert_eq!(store.writes(), 0);
}

#[tokio::test]
async fn malformed_payload_is_dead_lettered_by_default() {
    let source = Arc::new(MemorySource::listing());
    let bad = source.push("001", b"{not json".to_vec()).await;
    source
        .push("002", payload(json!({"type": "delete", "widgetId": "w-1"})))
        .await;
    let (_store, consumer) = attribute_consumer(source.clone(), fast_config());

    let report = consumer.run().await.unwrap();

    assert_eq!(report.dead_lettered, 1);
    assert_eq!(report.applied, 1);
    assert_eq!(source.dead_lettered().await, vec![bad]);
    assert!(source.pending().await.is_empty());
}

#[tokio::test]
async fn leave_policy_keeps_malformed_payload_pending_and_still_terminates() {
    let source = Arc::new(MemorySource::listing());
    let bad = source
        .push("001", payload(json!({"type": "create", "owner": "Ann"})))
        .await;
    let config = ConsumerConfig {
        decode_failures: DecodeFailurePolicy::Leave,
        ..fast_config()
    };
    let (_store, consumer) = attribute_consumer(source.clone(), config);

    let report = consumer.run().await.unwrap();

    assert_eq!(report.failed, 1);
    // Poll 1 finds it, polls 2 and 3 only see the parked item.
    assert_eq!(report.polls, 3);
    assert_eq!(source.pending().await, vec![bad]);
    assert!(source.dead_lettered().await.is_empty());
}

#[tokio::test]
async fn parked_item_at_head_of_queue_does_not_hide_later_items() {
    let source = Arc::new(MemorySource::queue(1));
    let bad = source.push("", b"{not json".to_vec()).await;
    source
        .push("", payload(json!({"type": "create", "widgetId": "w-1", "owner": "Ann"})))
        .await;
    let config = ConsumerConfig {
        decode_failures: DecodeFailurePolicy::Leave,
        ..fast_config()
    };
    let (store, consumer) = attribute_consumer(source.clone(), config);

    let report = consumer.run().await.unwrap();

    assert_eq!(report.applied, 1);
    assert_eq!(report.failed, 1);
    assert!(store.get("w-1").await.is_some());
    assert_eq!(source.pending().await, vec![bad]);
}

#[tokio::test]
async fn full_batch_of_parked_items_still_drains_the_backlog() {
    let source = Arc::new(MemorySource::queue(2));
    let first = source.push("", b"{not json".to_vec()).await;
    let second = source.push("", b"[1, 2]".to_vec()).await;
    for i in 0..3 {
        source
            .push(
                "",
                payload(json!({"type": "create", "widgetId": format!("w-{i}"), "owner": "Ann"})),
            )
            .await;
    }
    let config = ConsumerConfig {
        decode_failures: DecodeFailurePolicy::Leave,
        ..fast_config()
    };
    let (store, consumer) = attribute_consumer(source.clone(), config);

    let report = consumer.run().await.unwrap();

    assert_eq!(report.failed, 2);
    assert_eq!(report.applied, 3);
    assert_eq!(store.len().await, 3);
    // Parked batch, two backlog batches, then two polls with nothing new.
    assert_eq!(report.polls, 5);
    assert_eq!(source.pending().await, vec![first, second]);
}

#[tokio::test]
async fn deferred_queue_items_return_once_the_queue_is_otherwise_empty() {
    let source = Arc::new(MemorySource::queue(10));
    let first = source.push("", b"a".to_vec()).await;
    let second = source.push("", b"b".to_vec()).await;

    let items = source.poll().await.unwrap();
    source.defer(&items[0]).await.unwrap();

    let visible = source.poll().await.unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].handle, second);
    source.acknowledge(&visible[0]).await.unwrap();

    assert!(source.poll().await.unwrap().is_empty());
    let again = source.poll().await.unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].handle, first);
}

#[tokio::test]
async fn dead_letter_failure_keeps_item_pending_and_parked() {
    let source = Arc::new(MemorySource::listing());
    let bad = source.push("001", b"{not json".to_vec()).await;
    source
        .push("002", payload(json!({"type": "delete", "widgetId": "w-1"})))
        .await;
    source.set_fail_dead_letters(true);
    let (_store, consumer) = attribute_consumer(source.clone(), fast_config());

    let report = consumer.run().await.unwrap();

    assert_eq!(report.dead_lettered, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(report.applied, 1);
    // One poll with both items, then two that only see the parked one.
    assert_eq!(report.polls, 3);
    assert_eq!(source.pending().await, vec![bad]);
    assert!(source.dead_lettered().await.is_empty());
}

#[tokio::test]
async fn ack_failure_keeps_item_pending() {
    let source = Arc::new(MemorySource::listing());
    source
        .push("001", payload(json!({"type": "delete", "widgetId": "w-1"})))
        .await;
    source.set_fail_acks(true);
    let (_store, consumer) = attribute_consumer(source.clone(), fast_config());

    let item = source.poll().await.unwrap().remove(0);
    let outcome = consumer.process_item(&item).await;

    assert_eq!(outcome, ItemOutcome::Failed);
    assert_eq!(source.pending().await.len(), 1);
}

#[tokio::test]
async fn process_item_reports_applied_operation() {
    let source = Arc::new(MemorySource::listing());
    source
        .push("001", payload(json!({"type": "create", "widgetId": "w-1", "owner": "Ann"})))
        .await;
    let (_store, consumer) = attribute_consumer(source.clone(), fast_config());

    let item = source.poll().await.unwrap().remove(0);
    let outcome = consumer.process_item(&item).await;

    assert_eq!(
        outcome,
        ItemOutcome::Handled(Disposition::Applied(Operation::Create))
    );
}

#[tokio::test]
async fn shutdown_stops_the_loop() {
    let source = Arc::new(MemorySource::listing());
    let (_store, consumer) = attribute_consumer(
        source.clone(),
        ConsumerConfig {
            idle_pause: Duration::from_secs(3600),
            ..ConsumerConfig::default()
        },
    );

    let ctrl = consumer.clone();
    let handle = tokio::spawn(async move { consumer.run().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    ctrl.shutdown();

    let report = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop did not stop")
        .unwrap()
        .unwrap();
    assert_eq!(report.polls, 1);
}
