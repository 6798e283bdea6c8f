//! Unbounded async dispatch queue.
//!
//! Variant (a): an unbounded tokio mpsc channel consumed by continuous
//! iteration; the consumer wakes with zero delay when an item arrives.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use super::{process_one, DispatchQueue, QueueWorker, WorkItem, WorkProcessor};
use crate::error::{Result, SpaError};

/// Producer side of the unbounded async queue.
pub struct AsyncDispatchQueue {
    tx: mpsc::UnboundedSender<WorkItem>,
}

impl AsyncDispatchQueue {
    /// Spawn the queue and its consumer loop.
    pub fn spawn(processor: Arc<dyn WorkProcessor>) -> QueueWorker {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(consumer_loop(rx, processor, shutdown_rx));

        QueueWorker::new(Arc::new(Self { tx }), shutdown_tx, task)
    }
}

impl DispatchQueue for AsyncDispatchQueue {
    fn enqueue(&self, item: WorkItem) -> Result<()> {
        self.tx.send(item).map_err(|_| SpaError::QueueClosed)
    }
}

/// Consumer loop: dequeue one item at a time, isolate per-item failures.
///
/// A shutdown signal stops new iterations; the item being processed when
/// the signal arrives always runs to completion.
async fn consumer_loop(
    mut rx: mpsc::UnboundedReceiver<WorkItem>,
    processor: Arc<dyn WorkProcessor>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        tokio::select! {
            item = rx.recv() => match item {
                Some(item) => process_one(processor.as_ref(), item).await,
                None => return, // all producers gone
            },
            _ = shutdown_rx.changed() => {} // re-check at loop top
        }
    }
}
