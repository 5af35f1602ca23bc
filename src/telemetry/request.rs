//! Request processing span helpers.
//!
//! Every polled item is handled inside one `widget.request` span. Fields
//! unknown until after decoding are declared empty and recorded later.

use tracing::Span;

/// Start a span for one pending item, identified by its source key.
pub fn start_request_span(item_key: &str) -> Span {
    tracing::info_span!(
        "widget.request",
        "widget.item" = item_key,
        "widget.operation" = tracing::field::Empty,
        "widget.id" = tracing::field::Empty,
        "widget.request_id" = tracing::field::Empty,
        "widget.disposition" = tracing::field::Empty,
    )
}

/// Record the decoded identity of the request on its span.
pub fn record_decoded(span: &Span, operation: &str, widget_id: &str, request_id: Option<&str>) {
    span.record("widget.operation", operation);
    span.record("widget.id", widget_id);
    if let Some(request_id) = request_id {
        span.record("widget.request_id", request_id);
    }
}

/// Record how the request ended.
pub fn record_disposition(span: &Span, disposition: &str) {
    span.record("widget.disposition", disposition);
}
