//! Jobs: the runnable contract and the tracked unit of work.
//!
//! A [`Job`] wraps a caller-supplied [`JobRunner`] together with its
//! lifecycle state. Exactly one execution ever happens per job, however
//! many times [`Job::run`] is called or cancelled. Readers take a snapshot
//! under the job's own read lock, and the executing task publishes the
//! outcome under the write lock, so a snapshot is never torn.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tokio::sync::watch;
use tracing::{Instrument, info, warn};

use crate::model::{JobId, JobState, JobStatus, Outcome};
use crate::telemetry::metrics;

/// Fallback error text for failures that render as an empty string.
const EMPTY_ERROR_TEXT: &str = "job failed";

// ---------------------------------------------------------------------------
// Runnable contract
// ---------------------------------------------------------------------------

/// Anything that can be executed in the background.
///
/// Errors are captured on the job and reported through its status; they
/// never propagate into the dispatcher.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self) -> anyhow::Result<()>;
}

/// Adapts an async closure into a [`JobRunner`].
pub struct JobFn<F>(pub F);

#[async_trait]
impl<F, Fut> JobRunner for JobFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn run(&self) -> anyhow::Result<()> {
        (self.0)().await
    }
}

/// Adapts a synchronous closure into a [`JobRunner`]. The closure runs on
/// tokio's blocking pool so it may sleep or do blocking I/O.
pub struct BlockingJobFn<F>(Arc<F>);

impl<F> BlockingJobFn<F> {
    pub fn new(f: F) -> Self {
        Self(Arc::new(f))
    }
}

#[async_trait]
impl<F> JobRunner for BlockingJobFn<F>
where
    F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
{
    async fn run(&self) -> anyhow::Result<()> {
        let f = Arc::clone(&self.0);
        tokio::task::spawn_blocking(move || (*f)()).await?
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Mutable fields, guarded together so readers see them change atomically.
#[derive(Debug)]
struct JobFields {
    state: JobState,
}

/// State shared between a job and the task executing it.
#[derive(Debug)]
struct Lifecycle {
    id: JobId,
    fields: RwLock<JobFields>,
    done: watch::Sender<bool>,
}

/// One tracked unit of background work.
pub struct Job {
    start: DateTime<Utc>,
    runner: Arc<dyn JobRunner>,
    claimed: AtomicBool,
    lifecycle: Arc<Lifecycle>,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id())
            .field("start", &self.start)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Job {
    /// Create a pending job. Nothing runs until [`Job::run`] is called.
    pub fn new(id: JobId, runner: Arc<dyn JobRunner>) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            start: Utc::now(),
            runner,
            claimed: AtomicBool::new(false),
            lifecycle: Arc::new(Lifecycle {
                id,
                fields: RwLock::new(JobFields {
                    state: JobState::Pending,
                }),
                done,
            }),
        }
    }

    pub fn id(&self) -> JobId {
        self.lifecycle.id
    }

    /// Submission time.
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Current lifecycle state.
    pub fn state(&self) -> JobState {
        self.lifecycle.read_fields().state.clone()
    }

    /// Consistent point-in-time snapshot of the observable fields.
    pub fn status(&self) -> JobStatus {
        let fields = self.lifecycle.read_fields();
        JobStatus::from_state(self.id(), self.start, &fields.state)
    }

    /// Non-blocking completion check.
    pub fn is_complete(&self) -> bool {
        *self.lifecycle.done.borrow()
    }

    /// Wait until the job completes. Returns immediately if it already has.
    pub async fn wait(&self) {
        let mut rx = self.lifecycle.done.subscribe();
        // The sender lives as long as `self`, so this cannot observe a close.
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Independent observer of the completion signal. Each call returns a
    /// fresh receiver; the value flips to `true` exactly once.
    pub fn completion(&self) -> watch::Receiver<bool> {
        self.lifecycle.done.subscribe()
    }

    /// Execute the work at most once.
    ///
    /// The first caller claims the job before yielding and hands the work
    /// to its own task, so dropping any caller's future never cancels or
    /// repeats it. Every caller returns once the outcome is recorded.
    pub async fn run(&self) {
        if !self.claimed.swap(true, Ordering::AcqRel) {
            self.lifecycle.transition(JobState::Running);
            let lifecycle = Arc::clone(&self.lifecycle);
            let runner = Arc::clone(&self.runner);
            tokio::spawn(lifecycle.execute(runner).in_current_span());
        }
        self.wait().await;
    }
}

impl Lifecycle {
    async fn execute(self: Arc<Self>, runner: Arc<dyn JobRunner>) {
        let began = Instant::now();

        // Own task so a panicking runner is reported instead of unwinding here.
        let joined = tokio::spawn(async move { runner.run().await }).await;

        let outcome = match joined {
            Ok(Ok(())) => Outcome::Success,
            Ok(Err(e)) => Outcome::Failure(error_text(format!("{e:#}"))),
            Err(e) if e.is_panic() => Outcome::Failure(format!("job panicked: {e}")),
            Err(e) => Outcome::Failure(format!("job aborted: {e}")),
        };

        let duration_ms = began.elapsed().as_secs_f64() * 1000.0;
        let result = if outcome.is_success() { "ok" } else { "error" };
        match outcome.error() {
            None => info!(job_id = %self.id, duration_ms, "job completed"),
            Some(error) => warn!(job_id = %self.id, duration_ms, error, "job failed"),
        }
        metrics::jobs_completed().add(1, &[KeyValue::new("result", result)]);
        metrics::job_duration_ms().record(duration_ms, &[KeyValue::new("result", result)]);

        self.transition(JobState::Complete {
            finish: Utc::now(),
            outcome,
        });
        self.done.send_replace(true);
    }

    fn transition(&self, to: JobState) {
        let mut fields = self
            .fields
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if fields.state.can_transition_to(&to) {
            fields.state = to;
        } else {
            warn!(job_id = %self.id, from = %fields.state, to = %to, "ignored invalid job transition");
        }
    }

    fn read_fields(&self) -> std::sync::RwLockReadGuard<'_, JobFields> {
        self.fields
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn error_text(rendered: String) -> String {
    if rendered.is_empty() {
        EMPTY_ERROR_TEXT.to_string()
    } else {
        rendered
    }
}
