//! Background dispatch: control loop, worker pool, job handles.

pub mod control;
pub mod worker;

pub use control::{
    DEFAULT_JOB_EXPIRY, DEFAULT_WORKERS, Dispatcher, DispatcherConfig, DispatcherState, JobHandle,
};
pub use worker::WorkerState;
