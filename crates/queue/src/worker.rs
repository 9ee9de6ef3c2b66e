//! Worker runtime: claims jobs and runs them with registered handlers.

use std::collections::HashMap;
use std::io;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::store::{JobQueue, QueueError};
use super::types::{Job, JobResult, JobStatus};

/// Job handler function type.
pub type JobHandler = Box<dyn Fn(&Job) -> JobResult + Send + Sync>;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to poll for new jobs
    pub poll_interval: Duration,
    /// Name for logging
    pub name: String,
    /// Queues to pull from (empty = all)
    pub queues: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            name: "deferq-worker".to_string(),
            queues: Vec::new(),
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queues.push(queue.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Handle to control a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the loop to exit.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    /// Get current worker statistics.
    pub fn stats(&self) -> WorkerStats {
        self.stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_dead_lettered: u64,
    pub uptime_secs: u64,
}

impl WorkerStats {
    fn record(&mut self, result: &Result<(), String>, status: &JobStatus) {
        self.jobs_processed += 1;
        match result {
            Ok(()) => self.jobs_succeeded += 1,
            Err(_) => {
                self.jobs_failed += 1;
                if matches!(status, JobStatus::DeadLettered { .. }) {
                    self.jobs_dead_lettered += 1;
                }
            }
        }
    }
}

/// Background job worker.
///
/// Polls a queue for ready jobs, routes each to the handler registered for
/// its job class, and records success, retry or dead-lettering.
pub struct Worker<Q: JobQueue> {
    queue: Q,
    handlers: HashMap<String, JobHandler>,
}

impl<Q: JobQueue + 'static> Worker<Q> {
    /// Create a new worker over the given queue.
    pub fn new(queue: Q) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
        }
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Register a handler for a job class (`"*"` matches anything).
    pub fn register_handler<F>(&mut self, class: impl Into<String>, handler: F)
    where
        F: Fn(&Job) -> JobResult + Send + Sync + 'static,
    {
        self.handlers.insert(class.into(), Box::new(handler));
    }

    fn get_handler(&self, class: &str) -> Option<&JobHandler> {
        self.handlers.get(class).or_else(|| self.handlers.get("*"))
    }

    /// Spawn the worker loop in a background thread.
    pub fn spawn(self, config: WorkerConfig) -> io::Result<WorkerHandle>
    where
        Q: Send,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(WorkerStats::default()));
        let stats_clone = stats.clone();

        let join = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || {
                worker_loop(self, config, shutdown_rx, stats_clone);
            })?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }

    /// Run one claimed job (for tests or synchronous use).
    pub fn execute_one(&self, job: &mut Job) -> Result<(), String> {
        let Some(handler) = self.get_handler(&job.payload.class) else {
            let error = format!("no handler for job class: {}", job.payload.class);
            warn!(job_id = %job.id, error = %error, "no handler for job");
            job.mark_failed(error.clone(), Utc::now());
            self.settle(job, &error).map_err(|e| e.to_string())?;
            return Err(error);
        };

        let started = Utc::now();

        match handler(job) {
            JobResult::Success => {
                job.mark_completed(started);
                self.queue.update(job).map_err(|e| e.to_string())?;
                debug!(job_id = %job.id, display_class = %job.payload.display_class, "job completed");
                Ok(())
            }
            JobResult::Failure(error) => {
                job.mark_failed(error.clone(), started);
                self.settle(job, &error).map_err(|e| e.to_string())?;
                Err(error)
            }
        }
    }

    /// Claim and run every ready job on the configured queues.
    ///
    /// Returns how many jobs were run. Jobs whose retry falls due while
    /// draining are picked up again.
    pub fn drain(&self, queues: &[String]) -> Result<usize, QueueError> {
        let mut ran = 0;
        while let Some(mut job) = self.queue.claim_next(queues)? {
            let _ = self.execute_one(&mut job);
            ran += 1;
        }
        Ok(ran)
    }

    fn settle(&self, job: &Job, error: &str) -> Result<(), QueueError> {
        self.queue.update(job)?;
        if matches!(job.status, JobStatus::DeadLettered { .. }) {
            warn!(job_id = %job.id, error = %error, "job dead-lettered");
            self.queue.dead_letter(job.clone(), error.to_string())?;
        }
        Ok(())
    }
}

fn worker_loop<Q: JobQueue + 'static>(
    worker: Worker<Q>,
    config: WorkerConfig,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<WorkerStats>>,
) {
    info!(worker = %config.name, queues = ?config.queues, "worker started");
    let start_time = Instant::now();

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        if let Ok(mut s) = stats.lock() {
            s.uptime_secs = start_time.elapsed().as_secs();
        }

        match worker.queue.claim_next(&config.queues) {
            Ok(Some(mut job)) => {
                debug!(
                    worker = %config.name,
                    job_id = %job.id,
                    class = %job.payload.class,
                    "claimed job"
                );

                let result = worker.execute_one(&mut job);

                if let Ok(mut s) = stats.lock() {
                    s.record(&result, &job.status);
                }

                if let Err(e) = result {
                    debug!(
                        worker = %config.name,
                        job_id = %job.id,
                        error = %e,
                        status = ?job.status,
                        "job execution failed"
                    );
                }
            }
            Ok(None) => {
                thread::sleep(config.poll_interval);
            }
            Err(e) => {
                error!(worker = %config.name, error = ?e, "failed to claim job");
                thread::sleep(config.poll_interval);
            }
        }
    }

    info!(worker = %config.name, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryJobQueue;
    use crate::types::JobPayload;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn payload(class: &str) -> JobPayload {
        JobPayload::new(class, vec![])
    }

    #[test]
    fn execute_successful_job() {
        let queue = InMemoryJobQueue::arc();
        let mut worker = Worker::new(queue.clone());
        worker.register_handler("DelayedClass", |_job| JobResult::Success);

        queue.enqueue_now("default", payload("DelayedClass")).unwrap();

        let mut claimed = queue.claim_next(&[]).unwrap().unwrap();
        assert!(worker.execute_one(&mut claimed).is_ok());
        assert!(matches!(claimed.status, JobStatus::Completed));
    }

    #[test]
    fn failing_job_retries_then_dead_letters() {
        let queue = InMemoryJobQueue::arc();
        let mut worker = Worker::new(queue.clone());
        worker.register_handler("DelayedClass", |_job| {
            JobResult::Failure("test error".to_string())
        });

        let mut options = serde_json::Map::new();
        options.insert("retry".into(), serde_json::json!(2));
        queue
            .enqueue_now("default", payload("DelayedClass").with_options(options))
            .unwrap();
        let mut claimed = queue.claim_next(&[]).unwrap().unwrap();
        assert_eq!(claimed.retry_policy.max_attempts, 2);

        // First attempt
        assert!(worker.execute_one(&mut claimed).is_err());
        assert!(claimed.status.is_retriable());

        // Second attempt, skipping the backoff
        claimed.scheduled_at = None;
        queue.update(&claimed).unwrap();
        let mut claimed = queue.claim_next(&[]).unwrap().unwrap();
        assert!(worker.execute_one(&mut claimed).is_err());
        assert!(matches!(claimed.status, JobStatus::DeadLettered { .. }));
        assert_eq!(queue.list_dead_letters(10).unwrap().len(), 1);
    }

    #[test]
    fn wildcard_handler() {
        let queue = InMemoryJobQueue::arc();
        let mut worker = Worker::new(queue.clone());
        worker.register_handler("*", |_job| JobResult::Success);

        queue.enqueue_now("default", payload("Anything")).unwrap();

        let mut claimed = queue.claim_next(&[]).unwrap().unwrap();
        assert!(worker.execute_one(&mut claimed).is_ok());
    }

    #[test]
    fn missing_handler_fails_job() {
        let queue = InMemoryJobQueue::arc();
        let worker = Worker::new(queue.clone());

        queue.enqueue_now("default", payload("Unknown")).unwrap();

        let mut claimed = queue.claim_next(&[]).unwrap().unwrap();
        let err = worker.execute_one(&mut claimed).unwrap_err();
        assert!(err.contains("Unknown"));
    }

    #[test]
    fn drain_runs_every_ready_job() {
        let queue = InMemoryJobQueue::arc();
        let mut worker = Worker::new(queue.clone());
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        worker.register_handler("DelayedClass", move |_job| {
            seen.fetch_add(1, Ordering::SeqCst);
            JobResult::Success
        });

        for _ in 0..3 {
            queue.enqueue_now("default", payload("DelayedClass")).unwrap();
        }

        assert_eq!(worker.drain(&[]).unwrap(), 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(queue.queue_size("default").unwrap(), 0);
    }

    #[test]
    fn spawned_worker_processes_and_stops() {
        let queue = InMemoryJobQueue::arc();
        let mut worker = Worker::new(queue.clone());
        worker.register_handler("DelayedClass", |_job| JobResult::Success);
        let id = queue.enqueue_now("default", payload("DelayedClass")).unwrap();

        let handle = worker
            .spawn(WorkerConfig::default().with_poll_interval(Duration::from_millis(5)))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if handle.stats().jobs_succeeded == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(handle.stats().jobs_succeeded, 1);
        handle.shutdown();
        assert!(matches!(
            queue.get(id).unwrap().unwrap().status,
            JobStatus::Completed
        ));
    }
}
