//! Consumer loop: drain a work source through the dispatcher.
//!
//! Polls until two consecutive polls come back empty, then returns. Each
//! item is decoded, dispatched, and only then acknowledged, so a crash or
//! backend error leaves it pending for the next run.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tokio::sync::Notify;
use tracing::{Instrument, Span, error, info, warn};

use crate::backend::Disposition;
use crate::codec;
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::model::Operation;
use crate::source::{AckHandle, PendingItem, WorkSource};
use crate::telemetry::metrics;
use crate::telemetry::request::{record_decoded, record_disposition, start_request_span};

/// What to do with a payload that can never be applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodeFailurePolicy {
    /// Move it to the source's dead-letter sink.
    #[default]
    DeadLetter,
    /// Log it and leave it pending for manual inspection.
    Leave,
}

/// Configuration for the consumer loop.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Pause after the first empty poll before polling again.
    pub idle_pause: Duration,
    pub decode_failures: DecodeFailurePolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            idle_pause: Duration::from_millis(100),
            decode_failures: DecodeFailurePolicy::DeadLetter,
        }
    }
}

/// Result of handling one pending item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Applied or skipped, and acknowledged.
    Handled(Disposition),
    /// Unprocessable; moved to the dead-letter sink.
    DeadLettered,
    /// Left pending in the source.
    Failed,
}

/// Counts from one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub polls: usize,
    pub applied: usize,
    pub skipped: usize,
    pub dead_lettered: usize,
    pub failed: usize,
}

impl DrainReport {
    fn record(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Handled(Disposition::Applied(_)) => self.applied += 1,
            ItemOutcome::Handled(Disposition::Skipped { .. }) => self.skipped += 1,
            ItemOutcome::DeadLettered => self.dead_lettered += 1,
            ItemOutcome::Failed => self.failed += 1,
        }
    }
}

impl std::fmt::Display for DrainReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "polls={} applied={} skipped={} dead_lettered={} failed={}",
            self.polls, self.applied, self.skipped, self.dead_lettered, self.failed
        )
    }
}

/// The drain loop over one source and one dispatcher.
pub struct Consumer {
    source: Arc<dyn WorkSource>,
    dispatcher: Arc<Dispatcher>,
    config: ConsumerConfig,
    shutdown: Arc<Notify>,
    stopping: Arc<AtomicBool>,
}

impl Clone for Consumer {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            dispatcher: Arc::clone(&self.dispatcher),
            config: self.config.clone(),
            shutdown: Arc::clone(&self.shutdown),
            stopping: Arc::clone(&self.stopping),
        }
    }
}

impl Consumer {
    pub fn new(
        source: Arc<dyn WorkSource>,
        dispatcher: Dispatcher,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            source,
            dispatcher: Arc::new(dispatcher),
            config,
            shutdown: Arc::new(Notify::new()),
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Ask the loop to stop after the item it is working on.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Drain the source.
    ///
    /// Items that fail are parked for the rest of the run: they stay in the
    /// source but are deferred there, later polls ignore them, and a poll of
    /// only parked items counts as empty.
    ///
    /// # Errors
    ///
    /// Only a failed poll ends the run with an error; per-item failures are
    /// logged and counted.
    pub async fn run(&self) -> Result<DrainReport> {
        let mut report = DrainReport::default();
        let mut parked: HashSet<AckHandle> = HashSet::new();
        let mut idle = false;

        info!(
            source = self.source.name(),
            backend = self.dispatcher.backend_name(),
            "drain started"
        );

        while !self.is_stopping() {
            let items = self.source.poll().await?;
            report.polls += 1;

            let (stale, fresh): (Vec<PendingItem>, Vec<PendingItem>) = items
                .into_iter()
                .partition(|item| parked.contains(&item.handle));
            // Parked items seen again go back out of view; a queue would
            // otherwise keep serving them ahead of the rest of its backlog.
            for item in &stale {
                self.defer(item).await;
            }

            if fresh.is_empty() {
                if idle {
                    break;
                }
                idle = true;
                tokio::select! {
                    _ = self.shutdown.notified() => {}
                    _ = tokio::time::sleep(self.config.idle_pause) => {}
                }
                continue;
            }
            idle = false;

            for item in fresh {
                if self.is_stopping() {
                    break;
                }
                let outcome = self.process_item(&item).await;
                if outcome == ItemOutcome::Failed {
                    self.defer(&item).await;
                    parked.insert(item.handle.clone());
                }
                report.record(&outcome);
            }
        }

        if self.is_stopping() {
            info!(%report, "drain interrupted by shutdown");
        } else {
            info!(%report, "drain complete");
        }
        Ok(report)
    }

    /// Decode, dispatch and acknowledge one item.
    pub async fn process_item(&self, item: &PendingItem) -> ItemOutcome {
        let span = start_request_span(&item.handle.to_string());
        async {
            let start = Instant::now();
            let mut operation: Option<Operation> = None;

            let result = self.apply(item, &span, &mut operation).await;
            let outcome = match result {
                Ok(disposition) => self.acknowledge(item, disposition).await,
                Err(e) if e.is_poison() => self.reject(item, &e).await,
                Err(e) => {
                    error!(item = %item.handle, error = %e, "request failed; left pending");
                    ItemOutcome::Failed
                }
            };

            let op_label = operation.map_or("unknown", Operation::as_str);
            let outcome_label = match &outcome {
                ItemOutcome::Handled(d) => d.label(),
                ItemOutcome::DeadLettered => "dead_lettered",
                ItemOutcome::Failed => "failed",
            };
            record_disposition(&span, outcome_label);
            metrics::requests().add(
                1,
                &[
                    KeyValue::new("operation", op_label),
                    KeyValue::new("outcome", outcome_label),
                ],
            );
            metrics::request_duration_ms().record(
                start.elapsed().as_secs_f64() * 1000.0,
                &[KeyValue::new("operation", op_label)],
            );
            outcome
        }
        .instrument(span.clone())
        .await
    }

    async fn apply(
        &self,
        item: &PendingItem,
        span: &Span,
        operation: &mut Option<Operation>,
    ) -> Result<Disposition> {
        let request = codec::decode(&item.payload)?;
        *operation = Some(request.operation);
        record_decoded(
            span,
            request.operation.as_str(),
            &request.widget_id,
            request.request_id.as_deref(),
        );
        info!(
            operation = %request.operation,
            widget_id = %request.widget_id,
            request_id = request.request_id.as_deref().unwrap_or("-"),
            "processing request"
        );
        self.dispatcher.dispatch(&request).await
    }

    async fn defer(&self, item: &PendingItem) {
        if let Err(e) = self.source.defer(item).await {
            warn!(item = %item.handle, error = %e, "could not defer parked item");
        }
    }

    async fn acknowledge(&self, item: &PendingItem, disposition: Disposition) -> ItemOutcome {
        match self.source.acknowledge(item).await {
            Ok(()) => ItemOutcome::Handled(disposition),
            Err(e) => {
                error!(item = %item.handle, error = %e, "applied but not acknowledged");
                ItemOutcome::Failed
            }
        }
    }

    async fn reject(&self, item: &PendingItem, cause: &Error) -> ItemOutcome {
        match self.config.decode_failures {
            DecodeFailurePolicy::Leave => {
                warn!(item = %item.handle, error = %cause, "unprocessable request left pending");
                ItemOutcome::Failed
            }
            DecodeFailurePolicy::DeadLetter => match self.source.dead_letter(item).await {
                Ok(()) => {
                    warn!(
                        item = %item.handle,
                        error = %cause,
                        "unprocessable request dead-lettered"
                    );
                    ItemOutcome::DeadLettered
                }
                Err(e) => {
                    error!(item = %item.handle, error = %e, cause = %cause, "dead-letter failed");
                    ItemOutcome::Failed
                }
            },
        }
    }
}
