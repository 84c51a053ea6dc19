//! In-memory FIFO of scrape jobs with a single consumer.
//!
//! The job sequence and the `processing` flag share one mutex, so an enqueue
//! can never slip in between "queue is empty" and "flag cleared". At most one
//! job is in flight at any time; jobs enqueued during a drain are picked up
//! by that same drain.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Serialize;
use teloxide::types::ChatId;
use tokio::sync::watch;
use tracing::instrument;

use crate::error::JobError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub code: String,
    pub destination: ChatId,
}

impl Job {
    pub fn new(code: impl Into<String>, destination: ChatId) -> Self {
        Self {
            code: code.into(),
            destination,
        }
    }
}

/// Does the actual work for one job.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn process(&self, job: &Job) -> Result<(), JobError>;

    /// Called once for every job whose processing failed.
    async fn report_failure(&self, job: &Job, error: &JobError);
}

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<Job>,
    processing: bool,
    current: Option<Job>,
}

struct Inner {
    state: Mutex<QueueState>,
    handler: Arc<dyn JobHandler>,
    busy: watch::Sender<bool>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub pending: usize,
    pub processing: bool,
    pub current: Option<String>,
}

#[derive(Clone)]
pub struct QueueService {
    inner: Arc<Inner>,
}

impl QueueService {
    pub fn new(handler: Arc<dyn JobHandler>) -> Self {
        let (busy, _rx) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                handler,
                busy,
            }),
        }
    }

    /// Appends a job and starts a drain in the background if none is active.
    /// Returns the number of jobs waiting, this one included.
    pub fn enqueue(&self, job: Job) -> usize {
        let (pending, start) = {
            let mut state = self.inner.lock();
            tracing::info!(code = %job.code, destination = job.destination.0, "Job enqueued");
            state.jobs.push_back(job);
            let start = !state.processing;
            if start {
                state.processing = true;
                self.inner.busy.send_replace(true);
            }
            (state.jobs.len(), start)
        };

        if start {
            tokio::spawn(run_drain(Arc::clone(&self.inner)));
        }
        pending
    }

    /// Processes the queue until it is empty. A no-op while another drain
    /// is active.
    pub async fn drain(&self) {
        {
            let mut state = self.inner.lock();
            if state.processing || state.jobs.is_empty() {
                return;
            }
            state.processing = true;
            self.inner.busy.send_replace(true);
        }
        run_drain(Arc::clone(&self.inner)).await;
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.inner.lock();
        QueueSnapshot {
            pending: state.jobs.len(),
            processing: state.processing,
            current: state.current.as_ref().map(|job| job.code.clone()),
        }
    }

    /// Resolves when no drain is active.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.busy.subscribe();
        let _ = rx.wait_for(|busy| !*busy).await;
    }
}

async fn run_drain(inner: Arc<Inner>) {
    tracing::debug!("Drain started");
    loop {
        let job = {
            let mut state = inner.lock();
            match state.jobs.pop_front() {
                Some(job) => {
                    state.current = Some(job.clone());
                    job
                }
                None => {
                    state.processing = false;
                    state.current = None;
                    inner.busy.send_replace(false);
                    break;
                }
            }
        };

        process_one(&inner, job).await;
    }
    tracing::debug!("Drain finished, queue empty");
}

#[instrument(skip(inner), fields(code = %job.code))]
async fn process_one(inner: &Arc<Inner>, job: Job) {
    // own task so that a panic inside the handler fails only this job
    let handler = Arc::clone(&inner.handler);
    let task_job = job.clone();
    let outcome = tokio::spawn(async move { handler.process(&task_job).await }).await;

    let result = match outcome {
        Ok(result) => result,
        Err(join_error) => Err(JobError::Aborted(join_error.to_string())),
    };

    match result {
        Ok(()) => tracing::info!("Job completed"),
        Err(e) => {
            tracing::error!(error = %e, "Job failed");
            inner.handler.report_failure(&job, &e).await;
        }
    }
}
