//! Dispatch queue / worker pipeline.
//!
//! Decouples message intake from synchronous downstream execution. A
//! producer calls [`enqueue`](DispatchQueue::enqueue) and returns
//! immediately; a single background consumer dequeues items one at a time
//! and invokes the [`WorkProcessor`]. A failure while processing one item
//! is logged and the loop moves to the next item.
//!
//! Two interchangeable implementations exist, selected by [`QueueConfig`]:
//! - [`AsyncDispatchQueue`]: unbounded async queue, zero-delay wake
//! - [`PollingDispatchQueue`]: lock-free queue polled with a sleep when empty
//!
//! Ordering is FIFO within one queue instance. Configuration must select
//! exactly one variant; nothing is guaranteed across the two.

mod async_queue;
mod polling_queue;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, Instrument};
use uuid::Uuid;

use crate::config::{QueueConfig, QueueKind};
use crate::error::Result;

pub use async_queue::AsyncDispatchQueue;
pub use polling_queue::PollingDispatchQueue;

/// One unit of work handed from intake to the worker.
///
/// Enqueued exactly once by a producer, dequeued exactly once by the
/// consumer; nothing mutates it after enqueue.
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Correlation identifier threaded through every trace span.
    pub correlation_id: Uuid,
    /// Transaction code identifying the downstream operation.
    pub transaction_code: String,
    /// Decoded transaction payload as handed over by intake.
    pub payload: Value,
}

impl WorkItem {
    /// Create a work item with a fresh correlation id.
    pub fn new(transaction_code: impl Into<String>, payload: Value) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            transaction_code: transaction_code.into(),
            payload,
        }
    }

    /// Create a work item continuing an existing correlation.
    pub fn with_correlation(
        correlation_id: Uuid,
        transaction_code: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            correlation_id,
            transaction_code: transaction_code.into(),
            payload,
        }
    }
}

/// Downstream execution seam invoked by the consumer loop.
#[async_trait]
pub trait WorkProcessor: Send + Sync + 'static {
    /// Process one dequeued item.
    async fn process(&self, item: WorkItem) -> Result<()>;
}

/// Inbound API for producers (HTTP intake or internal callers).
pub trait DispatchQueue: Send + Sync {
    /// Submit one item; non-blocking. Fails only when the queue has been
    /// shut down or resources are exhausted.
    fn enqueue(&self, item: WorkItem) -> Result<()>;
}

/// A running queue/consumer pair.
pub struct QueueWorker {
    queue: Arc<dyn DispatchQueue>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl QueueWorker {
    pub(crate) fn new(
        queue: Arc<dyn DispatchQueue>,
        shutdown_tx: watch::Sender<bool>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            queue,
            shutdown_tx,
            task,
        }
    }

    /// Submit one item to the queue.
    pub fn enqueue(&self, item: WorkItem) -> Result<()> {
        self.queue.enqueue(item)
    }

    /// A cloneable handle to the inbound API.
    pub fn queue(&self) -> Arc<dyn DispatchQueue> {
        self.queue.clone()
    }

    /// Signal the consumer loop to stop after the in-flight item.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for the consumer loop to exit.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Spawn the dispatch queue variant selected by configuration.
pub fn spawn_dispatch_queue(config: &QueueConfig, processor: Arc<dyn WorkProcessor>) -> QueueWorker {
    match config.kind {
        QueueKind::Async => AsyncDispatchQueue::spawn(processor),
        QueueKind::Polling => PollingDispatchQueue::spawn(processor, config.poll_delay),
    }
}

/// Process one item inside a correlation span, isolating failures.
pub(crate) async fn process_one(processor: &dyn WorkProcessor, item: WorkItem) {
    let span = tracing::info_span!(
        "dispatch",
        correlation_id = %item.correlation_id,
        transaction_code = %item.transaction_code,
    );
    let correlation_id = item.correlation_id;

    if let Err(e) = processor.process(item).instrument(span).await {
        // One bad item never tears the consumer loop down.
        error!(
            correlation_id = %correlation_id,
            error = %e,
            "work item processing failed"
        );
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_item_fresh_correlation() {
        let a = WorkItem::new("0001", serde_json::json!({"amount": 10}));
        let b = WorkItem::new("0001", serde_json::json!({"amount": 10}));
        assert_ne!(a.correlation_id, b.correlation_id);
    }

    #[test]
    fn test_work_item_with_correlation() {
        let id = Uuid::new_v4();
        let item = WorkItem::with_correlation(id, "0002", Value::Null);
        assert_eq!(item.correlation_id, id);
        assert_eq!(item.transaction_code, "0002");
    }

    #[tokio::test]
    async fn test_spawn_selects_async_variant() {
        let processor = test_support::RecordingProcessor::new();
        let worker = spawn_dispatch_queue(&QueueConfig::default(), processor.clone());

        worker.enqueue(WorkItem::new("0001", Value::Null)).unwrap();
        test_support::wait_for_count(&processor, 1).await;

        worker.shutdown();
        worker.join().await;
    }

    #[tokio::test]
    async fn test_spawn_selects_polling_variant() {
        let config = QueueConfig {
            kind: QueueKind::Polling,
            poll_delay: std::time::Duration::from_millis(5),
        };
        let processor = test_support::RecordingProcessor::new();
        let worker = spawn_dispatch_queue(&config, processor.clone());

        worker.enqueue(WorkItem::new("0002", Value::Null)).unwrap();
        test_support::wait_for_count(&processor, 1).await;

        worker.shutdown();
        worker.join().await;
    }
}
