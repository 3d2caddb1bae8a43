//! Error types for jobq.

use thiserror::Error;

use crate::model::JobId;

#[derive(Debug, Error)]
pub enum Error {
    /// The id was never issued, or the job has since been purged.
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("dispatcher is stopped")]
    Stopped,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
