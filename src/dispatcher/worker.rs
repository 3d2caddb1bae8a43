//! Worker: advertises availability, runs whatever job it is handed.
//!
//! Each idle cycle the worker pushes a fresh one-shot slot into the
//! pool-wide availability queue. The router that pops the slot is the only
//! party that can fill it, so exactly one worker ever owns a given job.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{Instrument, debug, info, warn};

use crate::job::Job;
use crate::telemetry::job::{record_state_transition, start_job_span};

/// One-shot handoff slot a worker offers to the router.
pub(crate) type Slot = oneshot::Sender<Arc<Job>>;

/// Sent to a worker to stop it; the worker replies on it once it has exited.
type StopAck = oneshot::Sender<()>;

/// Observable worker lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Advertising availability.
    Idle,
    /// Executing a job.
    Busy,
    /// Loop exited. Terminal.
    Stopped,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerState::Idle => "idle",
            WorkerState::Busy => "busy",
            WorkerState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Handle held by the dispatcher for one running worker.
pub(crate) struct Worker {
    id: usize,
    stop_tx: oneshot::Sender<StopAck>,
    state: watch::Receiver<WorkerState>,
}

impl Worker {
    /// Spawn the worker loop.
    pub(crate) fn start(id: usize, available: mpsc::Sender<Slot>) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let (state_tx, state) = watch::channel(WorkerState::Idle);

        tokio::spawn(run(id, available, stop_rx, state_tx));
        debug!(worker_id = id, "worker started");

        Self { id, stop_tx, state }
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    /// Observer of this worker's lifecycle. Still readable after exit.
    pub(crate) fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.clone()
    }

    /// Ask the worker to stop. The returned receiver resolves once it has
    /// finished any claimed job and left its loop.
    pub(crate) fn signal_stop(self) -> oneshot::Receiver<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        // A send failure means the loop is already gone; dropping `ack_tx`
        // then resolves `ack_rx` straight away.
        let _ = self.stop_tx.send(ack_tx);
        ack_rx
    }
}

/// What woke an idle worker.
enum Wake {
    Advertised(bool),
    Handoff(Option<Arc<Job>>),
    Stop(Option<StopAck>),
}

async fn run(
    id: usize,
    available: mpsc::Sender<Slot>,
    mut stop_rx: oneshot::Receiver<StopAck>,
    state: watch::Sender<WorkerState>,
) {
    loop {
        state.send_replace(WorkerState::Idle);
        let (slot, mut handoff) = oneshot::channel::<Arc<Job>>();

        let wake = tokio::select! {
            biased;
            ack = &mut stop_rx => Wake::Stop(ack.ok()),
            sent = available.send(slot) => Wake::Advertised(sent.is_ok()),
        };
        match wake {
            Wake::Stop(ack) => return exit(id, &state, ack),
            Wake::Advertised(false) => {
                // Nobody left to hand us work; idle until told to stop.
                let ack = (&mut stop_rx).await;
                return exit(id, &state, ack.ok());
            }
            _ => {}
        }

        // A job already in the slot is taken before a pending stop.
        let wake = tokio::select! {
            biased;
            job = &mut handoff => Wake::Handoff(job.ok()),
            ack = &mut stop_rx => Wake::Stop(ack.ok()),
        };
        match wake {
            Wake::Handoff(Some(job)) => execute(id, &state, job).await,
            Wake::Stop(ack) => {
                // Close first so a later fill fails back to its router. One
                // that landed before the close is still ours to run.
                handoff.close();
                if let Ok(job) = handoff.try_recv() {
                    execute(id, &state, job).await;
                }
                return exit(id, &state, ack);
            }
            // A dropped slot means the router gave up on it; advertise again.
            Wake::Handoff(None) | Wake::Advertised(_) => {}
        }
    }
}

async fn execute(id: usize, state: &watch::Sender<WorkerState>, job: Arc<Job>) {
    state.send_replace(WorkerState::Busy);
    let span = start_job_span(job.id(), id);
    record_state_transition(&span, "pending", "running");
    job.run().instrument(span.clone()).await;
    record_state_transition(&span, "running", &job.state().to_string());
}

fn exit(id: usize, state: &watch::Sender<WorkerState>, ack: Option<StopAck>) {
    state.send_replace(WorkerState::Stopped);
    info!(worker_id = id, "worker stopped");
    match ack {
        Some(ack) => {
            if ack.send(()).is_err() {
                warn!(worker_id = id, "stop acknowledgment dropped");
            }
        }
        None => warn!(worker_id = id, "worker handle dropped without stop request"),
    }
}
