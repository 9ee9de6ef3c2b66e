//! Submission of captured calls to the job queue.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use deferq_core::record::datetime_to_timestamp;
use deferq_core::{DeferResult, DeferredCallRecord, JobId, ReceiverDescriptor, Schedule};
use deferq_queue::JobQueue;

use crate::codec;
use crate::config::{DeferConfig, ProxyStrategy};
use crate::registry::TypeRegistry;

/// Hands deferred calls to a [`JobQueue`].
///
/// When a registry is attached, receivers are checked against it at capture
/// time so unknown types fail before anything is enqueued.
pub struct Dispatcher<Q: JobQueue> {
    queue: Q,
    config: DeferConfig,
    registry: Option<Arc<TypeRegistry>>,
}

impl<Q: JobQueue> Dispatcher<Q> {
    pub fn new(queue: Q) -> Self {
        Self {
            queue,
            config: DeferConfig::default(),
            registry: None,
        }
    }

    pub fn with_config(mut self, config: DeferConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_registry(mut self, registry: Arc<TypeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(&self) -> &DeferConfig {
        &self.config
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn registry(&self) -> Option<&TypeRegistry> {
        self.registry.as_deref()
    }

    /// Submit with the configured strategy.
    pub fn submit(&self, record: DeferredCallRecord) -> DeferResult<JobId> {
        self.submit_with(record, self.config.strategy)
    }

    /// Encode `record` with `strategy` and push it now or into the scheduled
    /// set. Instants that are not in the future are enqueued immediately.
    pub fn submit_with(
        &self,
        record: DeferredCallRecord,
        strategy: ProxyStrategy,
    ) -> DeferResult<JobId> {
        self.warn_on_large_arguments(&record)?;

        let now = Utc::now();
        let due = record.schedule().resolve(now)?;
        let record = match (record.schedule(), due) {
            (Schedule::After { .. }, Some(at)) => record.with_schedule(Schedule::At {
                timestamp: datetime_to_timestamp(at),
            }),
            _ => record,
        };
        let payload = codec::encode(&record, strategy)?;

        let job_id = match due {
            Some(at) if at > now => self.queue.schedule_at(record.queue_name(), payload, at)?,
            _ => self.queue.enqueue_now(record.queue_name(), payload)?,
        };

        debug!(
            job_id = %job_id,
            display_class = %record.display_name(),
            queue = record.queue_name(),
            scheduled = ?due,
            "deferred call submitted"
        );
        Ok(job_id)
    }

    /// An instance receiver's identity travels as a job argument too, so it is
    /// measured alongside the call arguments.
    fn warn_on_large_arguments(&self, record: &DeferredCallRecord) -> DeferResult<()> {
        let limit = self.config.large_argument_bytes;
        let identity = match record.receiver() {
            ReceiverDescriptor::Instance { identity, .. } => Some(identity),
            ReceiverDescriptor::Type { .. } => None,
        };
        let arguments = identity
            .into_iter()
            .chain(record.positional_args())
            .chain(record.keyword_args().values());

        for argument in arguments {
            let size = serde_json::to_vec(argument)?.len();
            if size > limit {
                warn!(
                    display_class = %record.display_name(),
                    size,
                    "{} job argument is {} bytes, you should refactor it to reduce the size",
                    record.display_name(),
                    size
                );
            }
        }
        Ok(())
    }
}

impl<Q: JobQueue> core::fmt::Debug for Dispatcher<Q> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
