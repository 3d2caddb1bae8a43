//! Dispatcher: owns the worker pool, the intake queue, the job registry,
//! and the periodic audit sweep.
//!
//! Submissions are registered, then pushed onto a bounded intake queue.
//! The control loop pops each job and spawns a router for it, which waits
//! for a worker's advertised slot and hands the job over. A slow handoff
//! therefore never stalls intake of the next job. At most one router per
//! worker is in flight, so once every worker is busy the intake queue
//! fills and `submit` waits for space.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, debug, info, info_span, warn};

use super::worker::{Slot, Worker, WorkerState};
use crate::error::{Error, Result};
use crate::job::{BlockingJobFn, Job, JobFn, JobRunner};
use crate::model::{JobId, JobState, JobStatus};
use crate::registry::JobRegistry;
use crate::telemetry::metrics;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_JOB_EXPIRY: Duration = Duration::from_secs(5 * 60);

/// Intake queue capacity per worker.
const INTAKE_PER_WORKER: usize = 2;

/// Upper bound on the audit period. Longer expiries are still honoured by
/// the purge check; the sweep just runs more often than strictly needed.
const MAX_AUDIT_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Options for a new dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Number of parallel workers to spawn.
    pub workers: usize,
    /// How long a completed job stays queryable. Also the audit interval,
    /// capped at one day.
    pub job_expiry: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            job_expiry: DEFAULT_JOB_EXPIRY,
        }
    }
}

impl DispatcherConfig {
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Only finished jobs are purged. A job that runs past this is left
    /// alone.
    pub fn job_expiry(mut self, job_expiry: Duration) -> Self {
        self.job_expiry = job_expiry;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".to_string()));
        }
        if self.job_expiry.is_zero() {
            return Err(Error::Config("job_expiry must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Dispatcher lifecycle. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatcherState {
    Running,
    Stopping,
    Stopped,
}

/// Caller's handle to a submitted job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    job: Arc<Job>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.job.id()
    }

    pub fn status(&self) -> JobStatus {
        self.job.status()
    }

    pub fn state(&self) -> JobState {
        self.job.state()
    }

    pub fn is_complete(&self) -> bool {
        self.job.is_complete()
    }

    /// Wait for completion. Returns at once if the job already finished.
    pub async fn wait(&self) {
        self.job.wait().await
    }

    /// Independent completion observer, for use in `select!`.
    pub fn completion(&self) -> watch::Receiver<bool> {
        self.job.completion()
    }
}

/// Shared receiving end of the available-workers queue.
type Available = Arc<Mutex<mpsc::Receiver<Slot>>>;

/// Background job dispatcher with a fixed pool of workers.
///
/// Must be created inside a tokio runtime. Dropping it stops the pool in
/// the background; call [`Dispatcher::stop`] to wait for that.
pub struct Dispatcher {
    registry: Arc<JobRegistry>,
    intake: mpsc::Sender<Arc<Job>>,
    stop_tx: mpsc::Sender<oneshot::Sender<()>>,
    state: watch::Receiver<DispatcherState>,
    workers: Vec<watch::Receiver<WorkerState>>,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Spawn the workers and the control loop.
    pub fn new(config: DispatcherConfig) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(JobRegistry::with_workers(config.workers));
        let (intake_tx, intake_rx) = mpsc::channel(config.workers * INTAKE_PER_WORKER);
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let (state_tx, state) = watch::channel(DispatcherState::Running);

        // Workers hold the only senders: once they are all gone, routers
        // waiting for a slot see the queue close.
        let (available_tx, available_rx) = mpsc::channel(config.workers);
        let pool: Vec<Worker> = (0..config.workers)
            .map(|id| Worker::start(id, available_tx.clone()))
            .collect();
        drop(available_tx);
        let workers = pool.iter().map(Worker::subscribe).collect();

        let control = ControlLoop {
            registry: Arc::clone(&registry),
            intake: intake_rx,
            stop: stop_rx,
            available: Arc::new(Mutex::new(available_rx)),
            routers: Arc::new(Semaphore::new(config.workers)),
            pool,
            job_expiry: config.job_expiry,
            state: state_tx,
        };
        tokio::spawn(control.run().instrument(info_span!("dispatcher")));

        info!(
            workers = config.workers,
            job_expiry_ms =
                u64::try_from(config.job_expiry.as_millis()).unwrap_or(u64::MAX),
            "dispatcher started"
        );

        Ok(Self {
            registry,
            intake: intake_tx,
            stop_tx,
            state,
            workers,
            config,
        })
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Queue a job for execution and return its handle.
    ///
    /// Waits only while the intake queue is full. Fails with
    /// [`Error::Stopped`] once the dispatcher has begun stopping.
    pub async fn submit<R: JobRunner>(&self, runner: R) -> Result<JobHandle> {
        self.submit_arc(Arc::new(runner)).await
    }

    /// Queue an async closure.
    pub async fn submit_fn<F, Fut>(&self, f: F) -> Result<JobHandle>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.submit(JobFn(f)).await
    }

    /// Queue a blocking closure; it runs on tokio's blocking pool.
    pub async fn submit_blocking<F>(&self, f: F) -> Result<JobHandle>
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.submit(BlockingJobFn::new(f)).await
    }

    async fn submit_arc(&self, runner: Arc<dyn JobRunner>) -> Result<JobHandle> {
        if self.state() != DispatcherState::Running {
            return Err(Error::Stopped);
        }

        let job = self.registry.register(runner);
        let id = job.id();

        if self.intake.send(Arc::clone(&job)).await.is_err() {
            // Control loop is gone; never leave an unreachable pending job.
            self.registry.remove(id);
            return Err(Error::Stopped);
        }

        metrics::jobs_submitted().add(1, &[]);
        debug!(job_id = %id, "job submitted");
        Ok(JobHandle { job })
    }

    /// Snapshot of a tracked job.
    pub fn status(&self, id: JobId) -> Result<JobStatus> {
        self.job(id).map(|handle| handle.status())
    }

    /// Handle to a tracked job, e.g. to wait on it.
    pub fn job(&self, id: JobId) -> Result<JobHandle> {
        self.registry
            .get(id)
            .map(|job| JobHandle { job })
            .ok_or(Error::NotFound(id))
    }

    /// Snapshots of every tracked job, in no particular order.
    pub fn list(&self) -> Vec<JobStatus> {
        self.registry.statuses()
    }

    /// Number of tracked jobs.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state(&self) -> DispatcherState {
        *self.state.borrow()
    }

    /// Current state of each worker, indexed by worker id.
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.workers.iter().map(|state| *state.borrow()).collect()
    }

    /// Stop the dispatcher and wait until every worker has exited.
    ///
    /// Jobs already claimed by a worker run to completion first. Jobs
    /// still waiting for a worker are never started. Safe to call more
    /// than once and from several tasks.
    pub async fn stop(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.stop_tx.send(ack_tx).await.is_ok() {
            let _ = ack_rx.await;
        }
        let mut state = self.state.clone();
        // Err means the control loop is gone, which only happens once stopped.
        let _ = state
            .wait_for(|state| *state == DispatcherState::Stopped)
            .await;
    }
}

struct ControlLoop {
    registry: Arc<JobRegistry>,
    intake: mpsc::Receiver<Arc<Job>>,
    stop: mpsc::Receiver<oneshot::Sender<()>>,
    available: Available,
    routers: Arc<Semaphore>,
    pool: Vec<Worker>,
    job_expiry: Duration,
    state: watch::Sender<DispatcherState>,
}

impl ControlLoop {
    async fn run(mut self) {
        let period = self.job_expiry.min(MAX_AUDIT_PERIOD);
        let mut audit = tokio::time::interval_at(Instant::now() + period, period);
        audit.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let requester = loop {
            tokio::select! {
                biased;
                // None: every Dispatcher handle was dropped.
                request = self.stop.recv() => break request,
                Some((job, permit)) = next_job(&mut self.intake, &self.routers) => {
                    let available = Arc::clone(&self.available);
                    let span = info_span!("route", job_id = job.id().0);
                    tokio::spawn(route(job, available, permit).instrument(span));
                }
                _ = audit.tick() => {
                    let registry = Arc::clone(&self.registry);
                    let expiry = self.job_expiry;
                    tokio::spawn(async move { audit_registry(&registry, expiry) });
                }
            }
        };

        self.shutdown().await;
        if let Some(requester) = requester {
            let _ = requester.send(());
        }
    }

    async fn shutdown(&mut self) {
        self.state.send_replace(DispatcherState::Stopping);
        info!("dispatcher stopping");
        // Refuse further submissions. Jobs still buffered stay pending.
        self.intake.close();
        let mut stranded = 0usize;
        while self.intake.try_recv().is_ok() {
            stranded += 1;
        }
        if stranded > 0 {
            warn!(stranded, "queued jobs left unstarted by shutdown");
        }

        // Signal every worker first, then wait for each to acknowledge.
        let acks: Vec<(usize, oneshot::Receiver<()>)> = self
            .pool
            .drain(..)
            .map(|worker| (worker.id(), worker.signal_stop()))
            .collect();
        for (id, ack) in acks {
            if ack.await.is_err() {
                warn!(worker_id = id, "worker exited without acknowledging stop");
            }
        }

        self.state.send_replace(DispatcherState::Stopped);
        info!("dispatcher stopped");
    }
}

/// Wait for a free router, then for the next queued job.
async fn next_job(
    intake: &mut mpsc::Receiver<Arc<Job>>,
    routers: &Arc<Semaphore>,
) -> Option<(Arc<Job>, OwnedSemaphorePermit)> {
    let permit = Arc::clone(routers).acquire_owned().await.ok()?;
    let job = intake.recv().await?;
    Some((job, permit))
}

/// Hand `job` to the next worker that advertises a slot. The router permit
/// is released on return.
async fn route(mut job: Arc<Job>, available: Available, _permit: OwnedSemaphorePermit) {
    loop {
        let slot = available.lock().await.recv().await;
        let Some(slot) = slot else {
            warn!(job_id = %job.id(), "no workers left; job will not run");
            return;
        };
        match slot.send(job) {
            Ok(()) => {
                debug!("job handed to worker");
                return;
            }
            // That worker stopped after advertising; try the next one.
            Err(returned) => job = returned,
        }
    }
}

fn audit_registry(registry: &JobRegistry, expiry: Duration) {
    let purged = registry.purge_expired(Utc::now(), expiry);
    if purged > 0 {
        metrics::jobs_purged().add(purged as u64, &[]);
        info!(purged, remaining = registry.len(), "purged expired jobs");
    }
}
