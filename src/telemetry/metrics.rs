//! Metric instrument factories for jobq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments come from the `"jobq"` meter. Without an exporter the
//! global provider is a no-op, so these are safe to call unconditionally.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("jobq")
}

/// Counter: jobs accepted by `submit`.
pub fn jobs_submitted() -> Counter<u64> {
    meter()
        .u64_counter("jobq.jobs.submitted")
        .with_description("Number of jobs submitted")
        .build()
}

/// Counter: jobs that reached `complete`.
/// Labels: `result` ("ok" | "error").
pub fn jobs_completed() -> Counter<u64> {
    meter()
        .u64_counter("jobq.jobs.completed")
        .with_description("Number of jobs completed")
        .build()
}

/// Counter: finished jobs removed by the audit sweep.
pub fn jobs_purged() -> Counter<u64> {
    meter()
        .u64_counter("jobq.jobs.purged")
        .with_description("Number of expired jobs purged from the registry")
        .build()
}

/// Histogram: wall time spent executing a job's work.
/// Labels: `result`.
pub fn job_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("jobq.job.duration_ms")
        .with_description("Job execution duration in milliseconds")
        .with_unit("ms")
        .build()
}
