use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{mpsc, Mutex, Notify};

/// In-memory FIFO of request IDs awaiting a worker.
///
/// Unbounded: `enqueue` never waits. Each ID is handed to exactly one
/// `dequeue` caller. Items count as unfinished until `task_done` is called,
/// which is what `join` waits on. Nothing here survives a restart; interrupted
/// requests are reconciled from the database instead.
pub struct WorkQueue {
    sender: mpsc::UnboundedSender<i32>,
    receiver: Mutex<mpsc::UnboundedReceiver<i32>>,
    pending: AtomicUsize,
    unfinished: AtomicUsize,
    drained: Notify,
    closed: AtomicBool,
}

impl WorkQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
            pending: AtomicUsize::new(0),
            unfinished: AtomicUsize::new(0),
            drained: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue a request ID for processing.
    pub fn enqueue(&self, request_id: i32) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed(request_id));
        }

        self.unfinished.fetch_add(1, Ordering::SeqCst);
        let depth = self.pending.fetch_add(1, Ordering::SeqCst) + 1;

        if self.sender.send(request_id).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            self.finish_one();
            return Err(QueueError::Closed(request_id));
        }

        metrics::counter!("analysis_requests_enqueued_total").increment(1);
        metrics::gauge!("analysis_queue_depth").set(depth as f64);
        tracing::debug!(request_id, depth, "Request enqueued");
        Ok(())
    }

    /// Wait for the next request ID. Returns `None` once the channel is gone.
    pub async fn dequeue(&self) -> Option<i32> {
        let mut receiver = self.receiver.lock().await;
        let request_id = receiver.recv().await?;
        drop(receiver);

        let depth = self.pending.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::gauge!("analysis_queue_depth").set(depth as f64);
        Some(request_id)
    }

    /// Acknowledge that a dequeued item has been fully handled.
    pub fn task_done(&self) {
        self.finish_one();
    }

    fn finish_one(&self) {
        let previous = self
            .unfinished
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match previous {
            Ok(1) => self.drained.notify_waiters(),
            Ok(_) => {}
            Err(_) => tracing::warn!("task_done called more times than items were enqueued"),
        }
    }

    /// Wait until every enqueued item has been acknowledged.
    pub async fn join(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.unfinished.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Refuse further `enqueue` calls. Items already queued are still delivered.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Items waiting for a worker.
    pub fn depth(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Items enqueued but not yet acknowledged (waiting or being processed).
    pub fn unfinished(&self) -> usize {
        self.unfinished.load(Ordering::SeqCst)
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Work queue is closed, request {0} was not enqueued")]
    Closed(i32),
}
