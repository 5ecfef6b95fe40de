use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::services::gate::ConcurrencyGate;
use crate::services::processor::{ProcessError, ProcessOutcome, RequestProcessor};
use crate::services::queue::WorkQueue;

/// How a shutdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReport {
    /// Every queued item was acknowledged before workers were cancelled.
    Drained,
    /// The drain wait expired; in-flight work was cancelled.
    TimedOut { unfinished: usize },
}

/// Fixed set of long-lived workers consuming the work queue.
pub struct WorkerPool {
    queue: Arc<WorkQueue>,
    workers: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Spawn `size` workers. Size should equal the gate capacity.
    pub fn start(
        size: usize,
        queue: Arc<WorkQueue>,
        gate: Arc<ConcurrencyGate>,
        processor: Arc<RequestProcessor>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let workers = (1..=size.max(1))
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&queue),
                    Arc::clone(&gate),
                    Arc::clone(&processor),
                    shutdown.clone(),
                ))
            })
            .collect::<Vec<_>>();

        info!(workers = workers.len(), "Analysis workers started");
        Self {
            queue,
            workers,
            shutdown,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Stop intake, wait up to `drain_timeout` for queued work, then cancel workers.
    ///
    /// A drain timeout is reported, not escalated. Requests cut off mid-flight keep
    /// their last persisted status and are reconciled on the next startup.
    pub async fn shutdown(self, drain_timeout: Duration) -> ShutdownReport {
        info!(workers = self.workers.len(), "Shutting down analysis workers");
        self.queue.close();

        let report = match tokio::time::timeout(drain_timeout, self.queue.join()).await {
            Ok(()) => {
                info!("Analysis queue drained");
                ShutdownReport::Drained
            }
            Err(_) => {
                let unfinished = self.queue.unfinished();
                warn!(
                    unfinished,
                    timeout_secs = drain_timeout.as_secs(),
                    "Timed out waiting for analysis queue to drain, cancelling in-flight work"
                );
                ShutdownReport::TimedOut { unfinished }
            }
        };

        self.shutdown.cancel();
        for (index, worker) in self.workers.into_iter().enumerate() {
            match worker.await {
                Ok(()) => debug!(worker_id = index + 1, "Worker stopped"),
                Err(e) if e.is_cancelled() => debug!(worker_id = index + 1, "Worker cancelled"),
                Err(e) => error!(worker_id = index + 1, error = %e, "Worker ended abnormally"),
            }
        }
        info!("Analysis workers stopped");
        report
    }
}

/// One pool slot: dequeue, admit through the gate, process, acknowledge, repeat.
async fn worker_loop(
    worker_id: usize,
    queue: Arc<WorkQueue>,
    gate: Arc<ConcurrencyGate>,
    processor: Arc<RequestProcessor>,
    shutdown: CancellationToken,
) {
    info!(worker_id, "Analysis worker started");

    loop {
        let request_id = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = queue.dequeue() => match next {
                Some(id) => id,
                None => break,
            },
        };
        info!(worker_id, request_id, "Worker received request");

        // Processing runs in its own task so a panic is contained to this request.
        let task = {
            let gate = Arc::clone(&gate);
            let processor = Arc::clone(&processor);
            tokio::spawn(async move { admit_and_process(&gate, &processor, request_id).await })
        };
        let abort = task.abort_handle();

        let joined = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                abort.abort();
                warn!(worker_id, request_id, "Cancelled in-flight request during shutdown");
                queue.task_done();
                break;
            }
            joined = task => joined,
        };

        let failure_kind = match joined {
            Ok(Ok(ProcessOutcome::Completed)) => None,
            Ok(Ok(ProcessOutcome::Failed(reason))) => {
                debug!(worker_id, request_id, reason = %reason, "Request finished as Failed");
                None
            }
            Ok(Ok(ProcessOutcome::Skipped(reason))) => {
                debug!(worker_id, request_id, ?reason, "Request skipped");
                None
            }
            Ok(Err(e)) => {
                error!(worker_id, request_id, error = %e, "Worker encountered an error processing request");
                Some(e.kind())
            }
            Err(e) if e.is_panic() => {
                error!(worker_id, request_id, "Request processing panicked");
                Some("Panic")
            }
            Err(e) => {
                warn!(worker_id, request_id, error = %e, "Request processing was cancelled");
                Some("Cancelled")
            }
        };

        if let Some(kind) = failure_kind {
            if let Err(e) = processor.fail_after_error(request_id, kind).await {
                error!(worker_id, request_id, error = %e, "Failed to mark request as Failed after critical error");
            }
        }

        queue.task_done();
        debug!(worker_id, request_id, "Worker marked request done");
    }

    info!(worker_id, "Analysis worker exiting");
}

/// Holds a gate permit for the whole processing of one request.
async fn admit_and_process(
    gate: &ConcurrencyGate,
    processor: &RequestProcessor,
    request_id: i32,
) -> Result<ProcessOutcome, ProcessError> {
    let _permit = gate.acquire().await?;
    debug!(
        request_id,
        in_flight = gate.in_flight(),
        capacity = gate.capacity(),
        "Admitted through gate"
    );
    processor.process(request_id).await
}
