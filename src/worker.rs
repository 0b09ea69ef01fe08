use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{ReportError, Result};
use crate::queue::{Claim, ClaimedJob, FailOutcome, JobId, JobPayload, JobQueue, JobResult, RetryPolicy};

/// Pool sizing and per-job execution limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl WorkerSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            backoff: self.backoff,
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            timeout: Duration::from_millis(600_000),
            max_attempts: 3,
            backoff: Duration::from_millis(15_000),
        }
    }
}

/// What a worker hands to the handler for one attempt.
pub struct JobContext {
    queue: Arc<JobQueue>,
    pub job_id: JobId,
    pub payload: JobPayload,
    pub attempt: u32,
}

impl JobContext {
    pub fn new(queue: Arc<JobQueue>, job_id: JobId, payload: JobPayload, attempt: u32) -> Self {
        Self {
            queue,
            job_id,
            payload,
            attempt,
        }
    }

    /// Advisory stage marker; overwrites the previous one.
    pub async fn progress(&self, stage: &str) {
        self.queue.update_progress(self.job_id, stage).await;
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: &JobContext) -> Result<JobResult>;
}

/// Fixed set of workers pulling from a [`JobQueue`].
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn spawn(queue: Arc<JobQueue>, handler: Arc<dyn JobHandler>, settings: &WorkerSettings) -> Self {
        let cancel = CancellationToken::new();
        let concurrency = settings.concurrency.max(1);
        info!(concurrency, timeout_ms = settings.timeout.as_millis() as u64, "starting worker pool");

        let handles = (0..concurrency)
            .map(|worker| {
                let queue = Arc::clone(&queue);
                let handler = Arc::clone(&handler);
                let cancel = cancel.clone();
                let timeout = settings.timeout;
                tokio::spawn(async move { run_worker(worker, queue, handler, timeout, cancel).await })
            })
            .collect();

        Self { handles, cancel }
    }

    /// Stops idle workers and waits for busy ones to finish their current job.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "worker task ended abnormally");
            }
        }
        info!("worker pool stopped");
    }
}

async fn run_worker(
    worker: usize,
    queue: Arc<JobQueue>,
    handler: Arc<dyn JobHandler>,
    timeout: Duration,
    cancel: CancellationToken,
) {
    while !cancel.is_cancelled() {
        let wakeup = queue.wakeup();
        tokio::pin!(wakeup);
        wakeup.as_mut().enable();

        match queue.claim().await {
            Claim::Job(job) => execute(worker, &queue, &handler, job, timeout).await,
            Claim::Idle { next_due } => {
                let retry_due = async move {
                    match next_due {
                        Some(due) => tokio::time::sleep_until(due).await,
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = &mut wakeup => {}
                    _ = retry_due => {}
                }
            }
            Claim::Closed => break,
        }
    }
}

async fn execute(
    worker: usize,
    queue: &Arc<JobQueue>,
    handler: &Arc<dyn JobHandler>,
    job: ClaimedJob,
    timeout: Duration,
) {
    info!(worker, job_id = %job.id, kind = job.payload.kind(), attempt = job.attempt, "job active");
    let ctx = JobContext::new(Arc::clone(queue), job.id, job.payload, job.attempt);

    // Each attempt runs in its own task so a panic fails the attempt instead
    // of killing the worker.
    let handler = Arc::clone(handler);
    let attempt = tokio::spawn(async move { handler.handle(&ctx).await });
    let abort = attempt.abort_handle();

    let outcome = match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(err)) => {
            let message = panic_message(err);
            warn!(worker, job_id = %job.id, error = %message, "job handler panicked");
            Err(ReportError::Panicked(message))
        }
        Err(_) => {
            abort.abort();
            warn!(worker, job_id = %job.id, timeout_ms = timeout.as_millis() as u64, "job timed out");
            Err(ReportError::Timeout(timeout))
        }
    };

    match outcome {
        Ok(result) => queue.complete(job.id, result).await,
        Err(err) => {
            if let FailOutcome::Retrying { delay } = queue.fail(job.id, &err).await {
                info!(worker, job_id = %job.id, delay_ms = delay.as_millis() as u64, "job re-queued");
            }
        }
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
