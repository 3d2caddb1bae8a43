//! Core data model.
//!
//! A job is one unit of submitted background work. Its lifecycle is
//! `pending -> running -> complete`, and a completed job records whether
//! the work succeeded or failed. [`JobStatus`] is the point-in-time view
//! handed to pollers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Job ID
// ---------------------------------------------------------------------------

/// Identifier issued by the dispatcher. Monotonic, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl JobId {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for JobId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// How a completed job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Carries the rendered error. Never empty.
    Failure(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Outcome::Success => None,
            Outcome::Failure(msg) => Some(msg.as_str()),
        }
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    /// Registered and queued, not yet claimed by a worker.
    Pending,
    /// A worker is executing the work.
    Running,
    /// Terminal. No transition leaves this state.
    Complete {
        finish: DateTime<Utc>,
        outcome: Outcome,
    },
}

impl JobState {
    /// Can transition from self to `to`?
    pub fn can_transition_to(&self, to: &JobState) -> bool {
        use JobState::*;
        matches!(
            (self, to),
            (Pending, Running) | (Running, Complete { .. })
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Complete { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Complete {
                outcome: Outcome::Success,
                ..
            } => "succeeded",
            JobState::Complete { .. } => "failed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Status snapshot
// ---------------------------------------------------------------------------

/// Immutable copy of a job's observable fields at one instant.
///
/// Serializes to the polling wire format:
///
/// ```json
/// {"ID":3,"Complete":true,"Success":false,"Error":"boom","Start":"...","Finish":"..."}
/// ```
///
/// `Success` and `Finish` are present only once `Complete` is true, and
/// `Error` only when the job failed. Clients wait for `Complete` to flip
/// before reading the others, so absent keys must stay absent rather than
/// carry zero values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    #[serde(rename = "ID")]
    pub id: JobId,

    #[serde(rename = "Complete")]
    pub complete: bool,

    #[serde(rename = "Success", default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,

    #[serde(rename = "Error", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(rename = "Start")]
    pub start: DateTime<Utc>,

    #[serde(rename = "Finish", default, skip_serializing_if = "Option::is_none")]
    pub finish: Option<DateTime<Utc>>,
}

impl JobStatus {
    /// Project a job's fields into a snapshot. Optional fields are derived
    /// from the state so they can never disagree with `complete`.
    pub fn from_state(id: JobId, start: DateTime<Utc>, state: &JobState) -> Self {
        match state {
            JobState::Pending | JobState::Running => Self {
                id,
                complete: false,
                success: None,
                error: None,
                start,
                finish: None,
            },
            JobState::Complete { finish, outcome } => Self {
                id,
                complete: true,
                success: Some(outcome.is_success()),
                error: outcome.error().map(str::to_string),
                start,
                finish: Some(*finish),
            },
        }
    }

    /// True once the job finished more than `expiry` before `now`.
    /// Jobs that have not completed never expire.
    pub fn expired_at(&self, now: DateTime<Utc>, expiry: std::time::Duration) -> bool {
        let Some(finish) = self.finish else {
            return false;
        };
        match chrono::Duration::from_std(expiry) {
            Ok(expiry) => now - finish > expiry,
            // Longer than chrono can represent: nothing is that old.
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_forward_transitions_are_allowed() {
        let done = JobState::Complete {
            finish: Utc::now(),
            outcome: Outcome::Success,
        };
        assert!(JobState::Pending.can_transition_to(&JobState::Running));
        assert!(JobState::Running.can_transition_to(&done));
        assert!(!JobState::Pending.can_transition_to(&done));
        assert!(!done.can_transition_to(&JobState::Running));
        assert!(!done.can_transition_to(&done));
    }

    #[test]
    fn running_job_never_expires() {
        let start = Utc::now() - chrono::Duration::days(30);
        let status = JobStatus::from_state(JobId(1), start, &JobState::Running);
        assert!(!status.expired_at(Utc::now(), std::time::Duration::from_millis(1)));
    }

    #[test]
    fn complete_job_expires_strictly_after_expiry() {
        let finish = Utc::now();
        let status = JobStatus::from_state(
            JobId(1),
            finish,
            &JobState::Complete {
                finish,
                outcome: Outcome::Success,
            },
        );
        let expiry = std::time::Duration::from_secs(60);
        assert!(!status.expired_at(finish + chrono::Duration::seconds(60), expiry));
        assert!(status.expired_at(finish + chrono::Duration::seconds(61), expiry));
    }
}
