use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::futures::Notified;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ReportError, Result};
use crate::render::ReportFormat;

pub type JobId = Uuid;

const EVENT_CAPACITY: usize = 1024;

/// Finished jobs kept for `get`/`counts` before the oldest are dropped.
pub const DEFAULT_RETAIN_FINISHED: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassReportParams {
    pub class_id: i64,
    #[serde(default)]
    pub format: ReportFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyntheticLoadParams {
    #[serde(default = "SyntheticLoadParams::default_rows")]
    pub row_count: usize,
    #[serde(default = "SyntheticLoadParams::default_columns")]
    pub column_count: usize,
    #[serde(default = "SyntheticLoadParams::default_title")]
    pub title: String,
}

impl SyntheticLoadParams {
    fn default_rows() -> usize {
        20_000
    }

    fn default_columns() -> usize {
        10
    }

    fn default_title() -> String {
        "Synthetic load report".to_string()
    }
}

impl Default for SyntheticLoadParams {
    fn default() -> Self {
        Self {
            row_count: Self::default_rows(),
            column_count: Self::default_columns(),
            title: Self::default_title(),
        }
    }
}

/// What a queued job should produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum JobPayload {
    Roster,
    ClassReport(ClassReportParams),
    SyntheticLoad(SyntheticLoadParams),
}

impl JobPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Roster => "roster",
            Self::ClassReport(_) => "classReport",
            Self::SyntheticLoad(_) => "syntheticLoad",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub artifact_ref: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub message: String,
}

/// Attempts and backoff applied when a job fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Linear backoff: the delay grows with the number of attempts made.
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        self.backoff.saturating_mul(attempts_made)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(15_000),
        }
    }
}

/// Snapshot of a job as tracked by the queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportJob {
    pub id: JobId,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub progress: Option<String>,
    pub result: Option<JobResult>,
    pub error: Option<JobFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    backoff: Duration,
}

impl ReportJob {
    fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
        }
    }
}

/// A status transition or progress update, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: JobId,
    pub status: JobStatus,
    pub attempts_made: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    pub at: DateTime<Utc>,
}

impl JobEvent {
    fn from_job(job: &ReportJob) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            attempts_made: job.attempts_made,
            stage: None,
            result: job.result.clone(),
            error: job.error.clone(),
            at: job.updated_at,
        }
    }
}

/// A job handed to a worker by [`JobQueue::claim`].
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: JobId,
    pub payload: JobPayload,
    /// 1-based number of the attempt being started.
    pub attempt: u32,
}

#[derive(Debug)]
pub enum Claim {
    Job(ClaimedJob),
    /// Nothing ready; `next_due` is the earliest scheduled retry, if any.
    Idle { next_due: Option<Instant> },
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    Retrying { delay: Duration },
    Exhausted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: HashMap<JobId, ReportJob>,
    ready: VecDeque<JobId>,
    delayed: Vec<(Instant, JobId)>,
    finished: VecDeque<JobId>,
    closed: bool,
}

impl QueueState {
    fn promote_due(&mut self, now: Instant) {
        let mut index = 0;
        while index < self.delayed.len() {
            if self.delayed[index].0 <= now {
                let (_, id) = self.delayed.swap_remove(index);
                self.ready.push_back(id);
            } else {
                index += 1;
            }
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.delayed.iter().map(|(due, _)| *due).min()
    }

    /// Records a terminal job and forgets the oldest ones beyond `limit`.
    fn retire(&mut self, id: JobId, limit: usize) {
        self.finished.push_back(id);
        while self.finished.len() > limit {
            if let Some(oldest) = self.finished.pop_front() {
                self.jobs.remove(&oldest);
            }
        }
    }
}

/// In-process report job queue.
///
/// All state lives behind one lock, so claiming is serialized and a job is
/// handed to at most one worker at a time.
#[derive(Debug)]
pub struct JobQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Notify,
    events: broadcast::Sender<JobEvent>,
    default_policy: RetryPolicy,
    retain_finished: usize,
}

impl JobQueue {
    pub fn new(default_policy: RetryPolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            notify: Notify::new(),
            events,
            default_policy,
            retain_finished: DEFAULT_RETAIN_FINISHED,
        }
    }

    /// Caps how many completed or failed jobs stay visible to `get` and `counts`.
    pub fn with_retention(mut self, retain_finished: usize) -> Self {
        self.retain_finished = retain_finished;
        self
    }

    fn emit(&self, event: JobEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub async fn enqueue(&self, payload: JobPayload) -> Result<JobId> {
        self.enqueue_with(payload, self.default_policy).await
    }

    pub async fn enqueue_with(&self, payload: JobPayload, policy: RetryPolicy) -> Result<JobId> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(ReportError::QueueClosed);
        }

        let now = Utc::now();
        let job = ReportJob {
            id: Uuid::new_v4(),
            payload,
            status: JobStatus::Waiting,
            attempts_made: 0,
            max_attempts: policy.max_attempts.max(1),
            progress: None,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            backoff: policy.backoff,
        };
        let id = job.id;
        info!(job_id = %id, kind = job.payload.kind(), "job enqueued");

        self.emit(JobEvent::from_job(&job));
        state.ready.push_back(id);
        state.jobs.insert(id, job);
        drop(state);

        self.notify.notify_waiters();
        Ok(id)
    }

    /// Takes the next ready job and marks it active.
    pub async fn claim(&self) -> Claim {
        let mut state = self.state.lock().await;
        if state.closed {
            return Claim::Closed;
        }
        state.promote_due(Instant::now());

        while let Some(id) = state.ready.pop_front() {
            let Some(job) = state.jobs.get_mut(&id) else {
                continue;
            };
            if job.status != JobStatus::Waiting {
                continue;
            }

            job.status = JobStatus::Active;
            job.progress = None;
            job.updated_at = Utc::now();
            let claimed = ClaimedJob {
                id,
                payload: job.payload.clone(),
                attempt: job.attempts_made + 1,
            };
            let event = JobEvent::from_job(job);
            drop(state);

            debug!(job_id = %id, attempt = claimed.attempt, "job claimed");
            self.emit(event);
            return Claim::Job(claimed);
        }

        Claim::Idle {
            next_due: state.next_due(),
        }
    }

    /// Wake-up signal fired on enqueue, retry scheduling and close.
    ///
    /// Callers enable it before [`JobQueue::claim`] so an enqueue racing with
    /// an idle claim is not missed.
    pub fn wakeup(&self) -> Notified<'_> {
        self.notify.notified()
    }

    /// Overwrites the progress marker of an active job.
    pub async fn update_progress(&self, id: JobId, stage: &str) {
        let mut state = self.state.lock().await;
        let Some(job) = state.jobs.get_mut(&id) else {
            return;
        };
        if job.status != JobStatus::Active {
            return;
        }

        job.progress = Some(stage.to_string());
        job.updated_at = Utc::now();
        let mut event = JobEvent::from_job(job);
        event.stage = Some(stage.to_string());
        drop(state);

        debug!(job_id = %id, stage, "job progress");
        self.emit(event);
    }

    pub async fn complete(&self, id: JobId, result: JobResult) {
        let mut state = self.state.lock().await;
        let Some(job) = state.jobs.get_mut(&id) else {
            return;
        };
        if job.status != JobStatus::Active {
            warn!(job_id = %id, status = %job.status, "ignoring completion of inactive job");
            return;
        }

        job.attempts_made += 1;
        job.status = JobStatus::Completed;
        job.result = Some(result);
        job.error = None;
        job.updated_at = Utc::now();
        let event = JobEvent::from_job(job);
        state.retire(id, self.retain_finished);
        drop(state);

        info!(job_id = %id, attempts = event.attempts_made, "job completed");
        self.emit(event);
    }

    /// Records a failed attempt; re-schedules the job or marks it failed for good.
    pub async fn fail(&self, id: JobId, error: &ReportError) -> FailOutcome {
        let mut state = self.state.lock().await;
        let Some(job) = state.jobs.get_mut(&id) else {
            return FailOutcome::Exhausted;
        };
        if job.status != JobStatus::Active {
            warn!(job_id = %id, status = %job.status, "ignoring failure of inactive job");
            return FailOutcome::Exhausted;
        }

        job.attempts_made += 1;
        job.updated_at = Utc::now();
        let attempts = job.attempts_made;
        let policy = job.policy();

        if attempts < policy.max_attempts {
            let delay = policy.delay_for(attempts);
            job.status = JobStatus::Waiting;
            let event = JobEvent::from_job(job);
            state.delayed.push((Instant::now() + delay, id));
            drop(state);

            warn!(
                job_id = %id,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "job failed, retry scheduled"
            );
            self.emit(event);
            self.notify.notify_waiters();
            return FailOutcome::Retrying { delay };
        }

        let terminal = ReportError::ExhaustedRetries {
            attempts,
            last_error: error.to_string(),
        };
        job.status = JobStatus::Failed;
        job.error = Some(JobFailure {
            message: terminal.to_string(),
        });
        let event = JobEvent::from_job(job);
        state.retire(id, self.retain_finished);
        drop(state);

        tracing::error!(job_id = %id, attempts, error = %error, "job failed permanently");
        self.emit(event);
        FailOutcome::Exhausted
    }

    pub async fn get(&self, id: JobId) -> Option<ReportJob> {
        self.state.lock().await.jobs.get(&id).cloned()
    }

    pub async fn counts(&self) -> JobCounts {
        let state = self.state.lock().await;
        let mut counts = JobCounts::default();
        for job in state.jobs.values() {
            match job.status {
                JobStatus::Waiting => counts.waiting += 1,
                JobStatus::Active => counts.active += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Events for every job.
    pub fn subscribe(&self) -> JobSubscription {
        JobSubscription {
            receiver: self.events.subscribe(),
            job_id: None,
            state: Arc::clone(&self.state),
        }
    }

    /// Events for one job.
    pub fn subscribe_job(&self, id: JobId) -> JobSubscription {
        JobSubscription {
            receiver: self.events.subscribe(),
            job_id: Some(id),
            state: Arc::clone(&self.state),
        }
    }

    /// Stops admitting and handing out jobs. Waiting jobs stay waiting.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

/// Stream of job events, optionally narrowed to one job.
#[derive(Debug)]
pub struct JobSubscription {
    receiver: broadcast::Receiver<JobEvent>,
    job_id: Option<JobId>,
    state: Arc<Mutex<QueueState>>,
}

impl JobSubscription {
    /// Next matching event, or `None` once the queue is gone.
    ///
    /// A per-job subscription that lags falls back to the job's current
    /// state, so a dropped terminal event is still reported.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.job_id.map_or(true, |id| id == event.job_id) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "job event subscriber lagged");
                    let Some(id) = self.job_id else {
                        continue;
                    };
                    // The skipped events may include this job's terminal one.
                    let state = self.state.lock().await;
                    match state.jobs.get(&id) {
                        Some(job) if job.status.is_terminal() => return Some(JobEvent::from_job(job)),
                        Some(_) => {}
                        None => return None,
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Resolves with the first terminal event.
    pub async fn wait_terminal(&mut self) -> Option<JobEvent> {
        while let Some(event) = self.recv().await {
            if event.status.is_terminal() {
                return Some(event);
            }
        }
        None
    }
}
