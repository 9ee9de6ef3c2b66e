//! Capture proxy: records one method call instead of running it.

use deferq_core::{
    DeferError, DeferResult, DeferredCallRecord, EnqueueOptions, JobFlavor, JobId,
    ReceiverDescriptor,
};
use deferq_queue::JobQueue;

use crate::arguments::Arguments;
use crate::config::ProxyStrategy;
use crate::deferrable::Deferrable;
use crate::dispatch::Dispatcher;

/// Names the proxy answers itself; they are never deferred.
pub const PROXY_METHODS: &[&str] = &[
    "receiver_descriptor",
    "flavor",
    "options",
    "enqueue_options",
    "strategy",
    "clone",
    "eq",
    "ne",
    "hash",
    "fmt",
    "type_id",
    "type_name",
];

/// Stand-in for a receiver that captures the next call.
///
/// Obtained from [`Deferrable::defer`] and friends. Calling [`call`](Self::call)
/// consumes the proxy, so each proxy submits at most one job.
pub struct CallProxy<'a, Q: JobQueue> {
    dispatcher: &'a Dispatcher<Q>,
    receiver: &'a dyn Deferrable,
    options: EnqueueOptions,
    strategy: Option<ProxyStrategy>,
}

impl<'a, Q: JobQueue> CallProxy<'a, Q> {
    pub fn new(
        dispatcher: &'a Dispatcher<Q>,
        receiver: &'a dyn Deferrable,
        options: EnqueueOptions,
    ) -> Self {
        Self {
            dispatcher,
            receiver,
            options,
            strategy: None,
        }
    }

    /// Push to `name` instead of the default queue.
    pub fn queue(mut self, name: impl Into<String>) -> Self {
        self.options = self.options.queue(name);
        self
    }

    /// Add caller options. Options already on the proxy (the run time fixed
    /// by `defer_for`/`defer_until`, an earlier `queue`) take precedence.
    pub fn options(mut self, options: EnqueueOptions) -> Self {
        self.options = options.merge(self.options);
        self
    }

    /// Override the configured payload layout for this call.
    pub fn strategy(mut self, strategy: ProxyStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn receiver_descriptor(&self) -> DeferResult<ReceiverDescriptor> {
        self.receiver.receiver_descriptor()
    }

    pub fn flavor(&self) -> JobFlavor {
        self.receiver.job_flavor()
    }

    pub fn enqueue_options(&self) -> &EnqueueOptions {
        &self.options
    }

    /// Build the record for `method(args)` without submitting it.
    pub fn capture(&self, method: &str, args: Arguments) -> DeferResult<DeferredCallRecord> {
        if method.trim().is_empty() {
            return Err(DeferError::invalid_call("method name is empty"));
        }
        if PROXY_METHODS.contains(&method) {
            return Err(DeferError::invalid_call(format!(
                "`{method}` is answered by the proxy and cannot be deferred"
            )));
        }

        let receiver = self.receiver.receiver_descriptor()?;
        if let Some(registry) = self.dispatcher.registry() {
            registry.resolve(receiver.type_name())?;
        }

        let (positional, keywords) = args.into_parts()?;
        let queue = self
            .options
            .queue_name()
            .unwrap_or(self.dispatcher.config().default_queue.as_str())
            .to_string();

        Ok(DeferredCallRecord::new(receiver, method)?
            .with_flavor(self.receiver.job_flavor())
            .with_args(positional, keywords)
            .with_schedule(self.options.schedule())
            .on_queue(queue)
            .with_passthrough(self.options.passthrough().clone()))
    }

    /// Capture `method(args)` and submit it. The target is not invoked.
    pub fn call(self, method: &str, args: impl Into<Arguments>) -> DeferResult<JobId> {
        let record = self.capture(method, args.into())?;
        let strategy = self
            .strategy
            .unwrap_or(self.dispatcher.config().strategy);
        self.dispatcher.submit_with(record, strategy)
    }
}

impl<Q: JobQueue> core::fmt::Debug for CallProxy<'_, Q> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CallProxy")
            .field("receiver", &self.receiver.receiver_descriptor().ok())
            .field("flavor", &self.receiver.job_flavor())
            .field("options", &self.options)
            .field("strategy", &self.strategy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferrable::TypeRef;
    use crate::registry::{Returned, TypeDef, TypeRegistry};
    use deferq_core::Schedule;
    use deferq_queue::InMemoryJobQueue;
    use serde_json::json;
    use std::sync::Arc;

    const MY_MODEL: TypeRef = TypeRef::model("MyModel");

    #[test]
    fn capture_builds_record_without_submitting() {
        let queue = InMemoryJobQueue::arc();
        let dispatcher = Dispatcher::new(queue.clone());

        let record = MY_MODEL
            .defer(&dispatcher)
            .capture("long_class_method", Arguments::new().arg(&1).kwarg("k", &"v"))
            .unwrap();

        assert_eq!(record.display_name(), "MyModel.long_class_method");
        assert_eq!(record.flavor(), JobFlavor::Model);
        assert_eq!(record.positional_args(), &[json!(1)]);
        assert_eq!(record.keyword_args().get("k"), Some(&json!("v")));
        assert_eq!(record.queue_name(), "default");
        assert!(record.schedule().is_immediate());
        assert_eq!(queue.queue_size("default").unwrap(), 0);
    }

    #[test]
    fn proxy_methods_are_not_deferred() {
        let dispatcher = Dispatcher::new(InMemoryJobQueue::arc());

        for name in ["hash", "eq", ""] {
            let err = MY_MODEL.defer(&dispatcher).call(name, Arguments::new()).unwrap_err();
            assert!(matches!(err, DeferError::InvalidCall(_)), "{name}: {err:?}");
        }

        let model = MY_MODEL;
        let proxy = model.defer(&dispatcher);
        assert_eq!(
            proxy.receiver_descriptor().unwrap(),
            ReceiverDescriptor::of_type("MyModel")
        );
        assert_eq!(proxy.flavor(), JobFlavor::Model);
    }

    #[test]
    fn options_select_queue_schedule_and_passthrough() {
        let dispatcher = Dispatcher::new(InMemoryJobQueue::arc());

        let record = MY_MODEL
            .defer(&dispatcher)
            .options(EnqueueOptions::new().queue("notdefault").retry(false).at(10.0))
            .capture("long_class_method", Arguments::new())
            .unwrap();

        assert_eq!(record.queue_name(), "notdefault");
        assert_eq!(record.schedule(), Schedule::At { timestamp: 10.0 });
        assert_eq!(record.passthrough().get("retry"), Some(&json!(false)));
    }

    #[test]
    fn entry_point_time_wins_over_option_time() {
        let dispatcher = Dispatcher::new(InMemoryJobQueue::arc());
        let until = chrono::DateTime::from_timestamp(2_000_000_000, 0).unwrap();

        let record = MY_MODEL
            .defer_until(&dispatcher, until)
            .options(EnqueueOptions::new().at(1.0))
            .capture("long_class_method", Arguments::new())
            .unwrap();

        assert_eq!(record.schedule(), Schedule::At { timestamp: 2_000_000_000.0 });
    }

    #[test]
    fn unknown_type_fails_capture_when_registry_is_known() {
        let registry = TypeRegistry::new()
            .with(TypeDef::module("MyModel").type_method("long_class_method", |_| Ok(Returned::Nothing)));
        let dispatcher = Dispatcher::new(InMemoryJobQueue::arc()).with_registry(Arc::new(registry));

        assert!(MY_MODEL.defer(&dispatcher).capture("long_class_method", Arguments::new()).is_ok());

        let err = TypeRef::class("Removed")
            .defer(&dispatcher)
            .capture("doit", Arguments::new())
            .unwrap_err();
        assert!(matches!(err, DeferError::UnresolvableReceiver { .. }));
    }
}
