//! Job queue contract and the in-memory implementation.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use deferq_core::{DeferError, JobId};

use super::types::{DeadLetterEntry, Job, JobPayload, JobStatus};

/// Job queue abstraction.
///
/// Storage, fairness and durability are the implementation's business; the
/// deferred-call layer only relies on enqueue-now, schedule-at and claim.
pub trait JobQueue: Send + Sync {
    /// Push a job that is ready to run.
    fn enqueue_now(&self, queue: &str, payload: JobPayload) -> Result<JobId, QueueError>;

    /// Put a job in the scheduled set until `at`.
    fn schedule_at(
        &self,
        queue: &str,
        payload: JobPayload,
        at: DateTime<Utc>,
    ) -> Result<JobId, QueueError>;

    /// Get a job by ID.
    fn get(&self, job_id: JobId) -> Result<Option<Job>, QueueError>;

    /// Update a job.
    fn update(&self, job: &Job) -> Result<(), QueueError>;

    /// Claim the oldest ready job on any of `queues` (all queues when empty).
    /// Returns None if no jobs are available.
    fn claim_next(&self, queues: &[String]) -> Result<Option<Job>, QueueError>;

    /// Names of queues that have received an immediate job, sorted.
    fn queue_names(&self) -> Result<Vec<String>, QueueError>;

    /// Ready jobs waiting on `queue`, oldest first.
    fn list_queue(&self, queue: &str) -> Result<Vec<Job>, QueueError>;

    fn queue_size(&self, queue: &str) -> Result<usize, QueueError> {
        Ok(self.list_queue(queue)?.len())
    }

    /// Jobs that are not due yet, soonest first.
    fn list_scheduled(&self) -> Result<Vec<Job>, QueueError>;

    fn scheduled_size(&self) -> Result<usize, QueueError> {
        Ok(self.list_scheduled()?.len())
    }

    /// Withdraw a job that has not run yet. Returns whether it was present.
    fn remove(&self, job_id: JobId) -> Result<bool, QueueError>;

    /// Move a job to the dead-letter queue.
    fn dead_letter(&self, job: Job, reason: String) -> Result<(), QueueError>;

    /// List dead-lettered jobs, oldest first.
    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, QueueError>;
}

/// Job queue error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

impl From<QueueError> for DeferError {
    fn from(value: QueueError) -> Self {
        DeferError::queue_unavailable(value.to_string())
    }
}

fn poisoned<T>(_: T) -> QueueError {
    QueueError::Unavailable("queue lock poisoned".to_string())
}

/// In-memory job queue for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    jobs: RwLock<HashMap<JobId, Job>>,
    queues: RwLock<BTreeSet<String>>,
    dead_letters: RwLock<HashMap<JobId, DeadLetterEntry>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn insert(&self, job: Job) -> Result<JobId, QueueError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        if jobs.contains_key(&job.id) {
            return Err(QueueError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }
}

impl JobQueue for InMemoryJobQueue {
    fn enqueue_now(&self, queue: &str, payload: JobPayload) -> Result<JobId, QueueError> {
        let id = self.insert(Job::new(queue, payload))?;
        self.queues
            .write()
            .map_err(poisoned)?
            .insert(queue.to_string());
        Ok(id)
    }

    fn schedule_at(
        &self,
        queue: &str,
        payload: JobPayload,
        at: DateTime<Utc>,
    ) -> Result<JobId, QueueError> {
        self.insert(Job::new(queue, payload).scheduled_at(at))
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, QueueError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        Ok(jobs.get(&job_id).cloned())
    }

    fn update(&self, job: &Job) -> Result<(), QueueError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        if !jobs.contains_key(&job.id) {
            return Err(QueueError::NotFound(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn claim_next(&self, queues: &[String]) -> Result<Option<Job>, QueueError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let now = Utc::now();

        // Oldest ready job first
        let next = jobs
            .values()
            .filter(|j| {
                matches!(j.status, JobStatus::Pending | JobStatus::Failed { .. })
                    && j.is_ready_at(now)
                    && (queues.is_empty() || queues.iter().any(|q| *q == j.queue))
            })
            .min_by_key(|j| (j.created_at, j.id.as_uuid().as_u128()))
            .map(|j| j.id);

        if let Some(job_id) = next {
            if let Some(job) = jobs.get_mut(&job_id) {
                job.mark_running();
                return Ok(Some(job.clone()));
            }
        }

        Ok(None)
    }

    fn queue_names(&self) -> Result<Vec<String>, QueueError> {
        let queues = self.queues.read().map_err(poisoned)?;
        Ok(queues.iter().cloned().collect())
    }

    fn list_queue(&self, queue: &str) -> Result<Vec<Job>, QueueError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        let now = Utc::now();
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| j.queue == queue && j.status == JobStatus::Pending && j.is_ready_at(now))
            .cloned()
            .collect();

        result.sort_by_key(|j| j.created_at);
        Ok(result)
    }

    fn list_scheduled(&self) -> Result<Vec<Job>, QueueError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        let now = Utc::now();
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| j.is_scheduled_at(now))
            .cloned()
            .collect();

        result.sort_by_key(|j| j.scheduled_at);
        Ok(result)
    }

    fn remove(&self, job_id: JobId) -> Result<bool, QueueError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        match jobs.get(&job_id) {
            Some(job) if job.status == JobStatus::Running => Ok(false),
            Some(_) => Ok(jobs.remove(&job_id).is_some()),
            None => Ok(false),
        }
    }

    fn dead_letter(&self, mut job: Job, reason: String) -> Result<(), QueueError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let mut dls = self.dead_letters.write().map_err(poisoned)?;

        job.status = JobStatus::DeadLettered {
            error: reason.clone(),
            attempts: job.attempt,
        };
        job.updated_at = Utc::now();

        jobs.remove(&job.id);
        dls.insert(job.id, DeadLetterEntry::new(job, reason));

        Ok(())
    }

    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, QueueError> {
        let dls = self.dead_letters.read().map_err(poisoned)?;
        let mut result: Vec<_> = dls.values().cloned().collect();

        result.sort_by_key(|e| e.dead_lettered_at);
        result.truncate(limit);
        Ok(result)
    }
}

impl<Q> JobQueue for Arc<Q>
where
    Q: JobQueue + ?Sized,
{
    fn enqueue_now(&self, queue: &str, payload: JobPayload) -> Result<JobId, QueueError> {
        (**self).enqueue_now(queue, payload)
    }

    fn schedule_at(
        &self,
        queue: &str,
        payload: JobPayload,
        at: DateTime<Utc>,
    ) -> Result<JobId, QueueError> {
        (**self).schedule_at(queue, payload, at)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, QueueError> {
        (**self).get(job_id)
    }

    fn update(&self, job: &Job) -> Result<(), QueueError> {
        (**self).update(job)
    }

    fn claim_next(&self, queues: &[String]) -> Result<Option<Job>, QueueError> {
        (**self).claim_next(queues)
    }

    fn queue_names(&self) -> Result<Vec<String>, QueueError> {
        (**self).queue_names()
    }

    fn list_queue(&self, queue: &str) -> Result<Vec<Job>, QueueError> {
        (**self).list_queue(queue)
    }

    fn queue_size(&self, queue: &str) -> Result<usize, QueueError> {
        (**self).queue_size(queue)
    }

    fn list_scheduled(&self) -> Result<Vec<Job>, QueueError> {
        (**self).list_scheduled()
    }

    fn scheduled_size(&self) -> Result<usize, QueueError> {
        (**self).scheduled_size()
    }

    fn remove(&self, job_id: JobId) -> Result<bool, QueueError> {
        (**self).remove(job_id)
    }

    fn dead_letter(&self, job: Job, reason: String) -> Result<(), QueueError> {
        (**self).dead_letter(job, reason)
    }

    fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, QueueError> {
        (**self).list_dead_letters(limit)
    }
}
