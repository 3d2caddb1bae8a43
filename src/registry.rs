//! Job registry: the id -> job map shared by the dispatcher's tasks.
//!
//! Membership (insert, lookup, purge) is guarded by the registry lock;
//! the fields of each job are guarded by that job's own lock. Reading one
//! job's status therefore never waits on another job's registration.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::job::{Job, JobRunner};
use crate::model::{JobId, JobStatus};

/// Initial map capacity per worker.
const CAPACITY_PER_WORKER: usize = 5;

#[derive(Debug)]
struct Inner {
    /// Next id to issue. Guarded with the map so issuance and insertion
    /// are one step.
    next_id: JobId,
    jobs: HashMap<JobId, Arc<Job>>,
}

#[derive(Debug)]
pub(crate) struct JobRegistry {
    inner: RwLock<Inner>,
}

impl JobRegistry {
    pub(crate) fn with_workers(workers: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_id: JobId(1),
                jobs: HashMap::with_capacity(workers * CAPACITY_PER_WORKER),
            }),
        }
    }

    /// Allocate the next id and insert a pending job under it.
    pub(crate) fn register(&self, runner: Arc<dyn JobRunner>) -> Arc<Job> {
        let mut inner = self.write();
        let id = inner.next_id;
        inner.next_id = id.next();
        let job = Arc::new(Job::new(id, runner));
        inner.jobs.insert(id, Arc::clone(&job));
        job
    }

    pub(crate) fn get(&self, id: JobId) -> Option<Arc<Job>> {
        self.read().jobs.get(&id).cloned()
    }

    pub(crate) fn remove(&self, id: JobId) -> Option<Arc<Job>> {
        self.write().jobs.remove(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.read().jobs.len()
    }

    /// Snapshot every tracked job. No ordering guarantee.
    pub(crate) fn statuses(&self) -> Vec<JobStatus> {
        self.read().jobs.values().map(|job| job.status()).collect()
    }

    /// Purge jobs that completed more than `expiry` before `now`.
    ///
    /// Two phases: candidates are collected under the read lock, then
    /// removed under a short write lock. Returns the number purged.
    pub(crate) fn purge_expired(&self, now: DateTime<Utc>, expiry: Duration) -> usize {
        let expired: Vec<JobId> = self
            .read()
            .jobs
            .values()
            .map(|job| job.status())
            .filter(|status| status.expired_at(now, expiry))
            .map(|status| status.id)
            .collect();

        if expired.is_empty() {
            return 0;
        }

        let mut inner = self.write();
        for id in &expired {
            inner.jobs.remove(id);
        }
        debug!(purged = expired.len(), remaining = inner.jobs.len(), "job registry audited");
        expired.len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobFn;

    fn noop() -> Arc<dyn JobRunner> {
        Arc::new(JobFn(|| async { anyhow::Ok(()) }))
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let registry = JobRegistry::with_workers(1);
        let ids: Vec<_> = (0..3).map(|_| registry.register(noop()).id()).collect();
        assert_eq!(ids, vec![JobId(1), JobId(2), JobId(3)]);
    }

    #[test]
    fn removed_ids_are_not_reissued() {
        let registry = JobRegistry::with_workers(1);
        let first = registry.register(noop()).id();
        registry.remove(first);
        let second = registry.register(noop()).id();
        assert_ne!(first, second);
        assert!(registry.get(first).is_none());
    }

    #[tokio::test]
    async fn purge_removes_only_long_finished_jobs() {
        let registry = JobRegistry::with_workers(1);
        let finished = registry.register(noop());
        let pending = registry.register(noop());
        finished.run().await;

        let expiry = Duration::from_secs(60);
        let finish = finished.status().finish.unwrap();

        assert_eq!(registry.purge_expired(finish, expiry), 0);
        assert_eq!(registry.len(), 2);

        let later = finish + chrono::Duration::seconds(120);
        assert_eq!(registry.purge_expired(later, expiry), 1);
        assert!(registry.get(finished.id()).is_none());
        assert!(registry.get(pending.id()).is_some());
    }

    #[tokio::test]
    async fn purge_never_touches_unfinished_jobs() {
        let registry = JobRegistry::with_workers(1);
        let pending = registry.register(noop());

        let far_future = Utc::now() + chrono::Duration::days(365);
        for _ in 0..5 {
            assert_eq!(registry.purge_expired(far_future, Duration::from_millis(1)), 0);
        }
        assert!(registry.get(pending.id()).is_some());
    }
}
