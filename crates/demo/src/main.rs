use std::sync::Arc;
use std::time::Duration;

use deferq_delay::{DeferConfig, DeferredCallExecutor, Dispatcher};
use deferq_demo::app;
use deferq_queue::{InMemoryJobQueue, JobQueue, Worker, WorkerConfig};

fn main() -> anyhow::Result<()> {
    deferq_observability::init();

    let config = DeferConfig::from_env()?;
    tracing::info!(
        default_queue = %config.default_queue,
        strategy = ?config.strategy,
        "starting demo"
    );

    let users = app::sample_users();
    let registry = Arc::new(app::build_registry(&users));
    let queue = InMemoryJobQueue::arc();
    let dispatcher = Dispatcher::new(Arc::clone(&queue))
        .with_config(config)
        .with_registry(Arc::clone(&registry));

    let ids = app::enqueue_samples(&dispatcher, &users, Duration::from_secs(1))?;
    tracing::info!(
        jobs = ids.len(),
        scheduled = queue.scheduled_size()?,
        "deferred calls submitted"
    );

    let mut worker = Worker::new(Arc::clone(&queue));
    Arc::new(DeferredCallExecutor::new(registry)).register(&mut worker);
    let handle = worker.spawn(WorkerConfig::default().with_name("demo"))?;

    std::thread::sleep(Duration::from_secs(2));
    let stats = handle.stats();
    handle.shutdown();

    tracing::info!(
        processed = stats.jobs_processed,
        succeeded = stats.jobs_succeeded,
        failed = stats.jobs_failed,
        "demo finished"
    );
    Ok(())
}
