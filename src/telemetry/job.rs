//! Job execution span helpers.
//!
//! Provides span creation and state-transition recording for jobs
//! flowing through the worker pool.

use tracing::Span;

use crate::model::JobId;

/// Start a span for one job execution on a worker.
///
/// The `job.state` field is declared empty and is filled by
/// [`record_state_transition`].
pub fn start_job_span(job_id: JobId, worker_id: usize) -> Span {
    tracing::info_span!(
        "job.execute",
        "job.id" = job_id.0,
        "worker.id" = worker_id,
        "job.state" = tracing::field::Empty,
    )
}

/// Record a state transition on the span and emit an `info` event in it.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("job.state", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
