//! Metric instrument factories for widget-consumer.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without an exporter configured the global provider is a no-op.

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("widget-consumer")
}

/// Counter: change requests handled.
/// Labels: `operation`, `outcome` ("applied" | "skipped" | "failed" | "dead_lettered").
pub fn requests() -> Counter<u64> {
    meter()
        .u64_counter("widget.requests")
        .with_description("Number of widget change requests handled")
        .build()
}

/// Counter: work source operations (poll, poll_empty, ack, dead_letter).
/// Labels: `source`, `operation`.
pub fn source_operations() -> Counter<u64> {
    meter()
        .u64_counter("widget.source.operations")
        .with_description("Number of pending-work source operations")
        .build()
}

/// Counter: storage operations (write, remove, put, update, exists).
/// Labels: `store`, `operation`.
pub fn store_operations() -> Counter<u64> {
    meter()
        .u64_counter("widget.store.operations")
        .with_description("Number of storage backend operations")
        .build()
}

/// Histogram: per-request pipeline duration in milliseconds.
/// Labels: `operation`.
pub fn request_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("widget.request.duration_ms")
        .with_description("Change request processing duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Record one source operation.
pub fn record_source_op(source: &'static str, operation: &'static str) {
    source_operations().add(
        1,
        &[
            KeyValue::new("source", source),
            KeyValue::new("operation", operation),
        ],
    );
}

/// Record one store operation.
pub fn record_store_op(store: &'static str, operation: &'static str) {
    store_operations().add(
        1,
        &[
            KeyValue::new("store", store),
            KeyValue::new("operation", operation),
        ],
    );
}
