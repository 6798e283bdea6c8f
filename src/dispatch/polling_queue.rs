//! Lock-free polling dispatch queue.
//!
//! Variant (b): a lock-free `SegQueue` drained by a loop that sleeps a
//! configured delay when the queue is empty and logs the remaining depth
//! whenever a backlog exists after processing an item.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_queue::SegQueue;
use tokio::sync::watch;
use tracing::debug;

use super::{process_one, DispatchQueue, QueueWorker, WorkItem, WorkProcessor};
use crate::error::{Result, SpaError};

/// Producer side of the lock-free polling queue.
pub struct PollingDispatchQueue {
    queue: Arc<SegQueue<WorkItem>>,
    open: Arc<AtomicBool>,
}

impl PollingDispatchQueue {
    /// Spawn the queue and its polling consumer loop.
    pub fn spawn(processor: Arc<dyn WorkProcessor>, poll_delay: Duration) -> QueueWorker {
        let queue = Arc::new(SegQueue::new());
        let open = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(consumer_loop(
            queue.clone(),
            open.clone(),
            processor,
            poll_delay,
            shutdown_rx,
        ));

        QueueWorker::new(Arc::new(Self { queue, open }), shutdown_tx, task)
    }
}

impl DispatchQueue for PollingDispatchQueue {
    fn enqueue(&self, item: WorkItem) -> Result<()> {
        if !self.open.load(Ordering::Acquire) {
            return Err(SpaError::QueueClosed);
        }
        self.queue.push(item);
        Ok(())
    }
}

/// Polling consumer: pop, process, sleep when empty.
async fn consumer_loop(
    queue: Arc<SegQueue<WorkItem>>,
    open: Arc<AtomicBool>,
    processor: Arc<dyn WorkProcessor>,
    poll_delay: Duration,
    shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        match queue.pop() {
            Some(item) => {
                process_one(processor.as_ref(), item).await;

                let depth = queue.len();
                if depth > 0 {
                    debug!(depth, "dispatch queue backlog");
                }
            }
            None => tokio::time::sleep(poll_delay).await,
        }
    }

    open.store(false, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::test_support::{wait_for_count, RecordingProcessor};
    use serde_json::Value;

    const DELAY: Duration = Duration::from_millis(5);

    #[tokio::test]
    async fn test_fifo_order_preserved() {
        let processor = RecordingProcessor::new();
        let worker = PollingDispatchQueue::spawn(processor.clone(), DELAY);

        for i in 0..10 {
            worker
                .enqueue(WorkItem::new(format!("{:04}", i), Value::Null))
                .unwrap();
        }

        wait_for_count(&processor, 10).await;
        let expected: Vec<String> = (0..10).map(|i| format!("{:04}", i)).collect();
        assert_eq!(processor.seen(), expected);

        worker.shutdown();
        worker.join().await;
    }

    #[tokio::test]
    async fn test_failing_item_does_not_kill_consumer() {
        let processor = RecordingProcessor::new();
        let worker = PollingDispatchQueue::spawn(processor.clone(), DELAY);

        worker.enqueue(WorkItem::new("FAIL-0", Value::Null)).unwrap();
        worker.enqueue(WorkItem::new("0001", Value::Null)).unwrap();

        wait_for_count(&processor, 2).await;
        assert_eq!(processor.seen(), vec!["FAIL-0", "0001"]);

        worker.shutdown();
        worker.join().await;
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_fails() {
        let processor = RecordingProcessor::new();
        let worker = PollingDispatchQueue::spawn(processor, DELAY);

        let queue = worker.queue();
        worker.shutdown();
        worker.join().await;

        let err = queue.enqueue(WorkItem::new("0001", Value::Null)).unwrap_err();
        assert!(matches!(err, SpaError::QueueClosed));
    }

    #[tokio::test]
    async fn test_sleeps_when_empty_then_picks_up_work() {
        let processor = RecordingProcessor::new();
        let worker = PollingDispatchQueue::spawn(processor.clone(), DELAY);

        // Let the consumer go through a few empty polls first.
        tokio::time::sleep(Duration::from_millis(25)).await;

        worker.enqueue(WorkItem::new("0001", Value::Null)).unwrap();
        wait_for_count(&processor, 1).await;

        worker.shutdown();
        worker.join().await;
    }
}
