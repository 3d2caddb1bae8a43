//! # jobq
//!
//! In-process background job dispatcher.
//!
//! A fixed pool of workers executes submitted units of work. Every job gets
//! a monotonically increasing id that callers poll for a [`JobStatus`]
//! snapshot, and finished jobs are purged once they have been complete for
//! longer than the configured expiry.
//!
//! ```no_run
//! # async fn demo() -> jobq::error::Result<()> {
//! use jobq::{Dispatcher, DispatcherConfig};
//!
//! let dispatcher = Dispatcher::new(DispatcherConfig::default().workers(2))?;
//! let handle = dispatcher.submit_fn(|| async { anyhow::Ok(()) }).await?;
//! handle.wait().await;
//! assert_eq!(dispatcher.status(handle.id())?.success, Some(true));
//! dispatcher.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod job;
pub mod model;
mod registry;
pub mod telemetry;

pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherState, JobHandle, WorkerState};
pub use job::{BlockingJobFn, Job, JobFn, JobRunner};
pub use model::{JobId, JobState, JobStatus, Outcome};
