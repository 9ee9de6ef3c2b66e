//! Worker side: turns a dequeued job back into a method call.

use std::sync::Arc;

use tracing::{debug, info, warn};

use deferq_core::{DeferError, DeferResult, DeferredCallRecord, JobFlavor};
use deferq_queue::{Job, JobQueue, JobResult, Worker};

use crate::arguments::Invocation;
use crate::codec;
use crate::registry::{Returned, TypeRegistry};

/// Replays deferred calls against a [`TypeRegistry`].
#[derive(Debug, Clone)]
pub struct DeferredCallExecutor {
    registry: Arc<TypeRegistry>,
}

impl DeferredCallExecutor {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Resolve the receiver, call the method and post-process the result
    /// according to the record's flavor.
    ///
    /// Each call performs the method again: re-delivered jobs run twice.
    pub fn perform(&self, record: &DeferredCallRecord) -> DeferResult<()> {
        let display_class = record.display_name();

        debug!(display_class = %display_class, phase = "resolving", "performing deferred call");
        let target = self.registry.resolve(record.receiver().type_name())?;
        if !target.responds_to(record.receiver(), record.method_name()) {
            return Err(DeferError::UnknownMethod {
                type_name: target.type_name().to_string(),
                method: record.method_name().to_string(),
            });
        }

        let kwargs = record.has_keyword_args().then(|| record.keyword_args());
        let call = Invocation::new(record.positional_args(), kwargs);

        debug!(display_class = %display_class, phase = "invoking", "performing deferred call");
        let returned = target.invoke(record.receiver(), record.method_name(), &call)?;

        match record.flavor() {
            JobFlavor::Class | JobFlavor::Model => {}
            JobFlavor::Mailer => deliver(record, returned)?,
        }

        debug!(display_class = %display_class, phase = "completed", "performed deferred call");
        Ok(())
    }

    /// Decode a dequeued job and perform it.
    pub fn perform_job(&self, job: &Job) -> DeferResult<()> {
        debug!(
            job_id = %job.id,
            queue = %job.queue,
            attempt = job.attempt,
            phase = "dequeued",
            "performing deferred call"
        );
        let record = codec::decode(&job.queue, &job.payload)?;
        self.perform(&record)
    }

    /// Route every deferred-call job class on `worker` to this executor.
    pub fn register<Q: JobQueue + 'static>(self: &Arc<Self>, worker: &mut Worker<Q>) {
        for flavor in JobFlavor::ALL {
            let executor = Arc::clone(self);
            worker.register_handler(flavor.class_name(), move |job: &Job| {
                match executor.perform_job(job) {
                    Ok(()) => JobResult::Success,
                    Err(e) => {
                        warn!(
                            job_id = %job.id,
                            display_class = %job.payload.display_class,
                            error = %e,
                            "deferred call failed"
                        );
                        JobResult::Failure(e.to_string())
                    }
                }
            });
        }
    }
}

fn deliver(record: &DeferredCallRecord, returned: Returned) -> DeferResult<()> {
    let type_name = record.receiver().type_name().to_string();
    let method = record.method_name().to_string();

    let message = match returned {
        Returned::Message(message) => message,
        other => {
            debug!(
                display_class = %record.display_name(),
                falsy = other.is_falsy(),
                phase = "delivering",
                "mailer returned no message"
            );
            return Err(DeferError::UndeliverableMessage { type_name, method });
        }
    };

    let summary = message.summary();
    message
        .deliver_now()
        .map_err(|source| DeferError::DeliveryFailed {
            type_name,
            method,
            source,
        })?;

    info!(display_class = %record.display_name(), message = %summary, "mail delivered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::Deliverable;
    use crate::registry::TypeDef;
    use deferq_core::ReceiverDescriptor;
    use serde_json::{Map, Value, json};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Note(Arc<AtomicUsize>);

    impl Deliverable for Note {
        fn deliver_now(self: Box<Self>) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Bounce;

    impl Deliverable for Bounce {
        fn deliver_now(self: Box<Self>) -> anyhow::Result<()> {
            anyhow::bail!("smtp refused")
        }
    }

    fn mailer(delivered: Arc<AtomicUsize>) -> TypeRegistry {
        TypeRegistry::new().with(
            TypeDef::module("UserMailer")
                .type_method("greetings", move |_| {
                    Ok(Returned::message(Note(Arc::clone(&delivered))))
                })
                .type_method("nothing", |_| Ok(Returned::Nothing))
                .type_method("bounce", |_| Ok(Returned::message(Bounce))),
        )
    }

    fn mail(method: &str) -> DeferredCallRecord {
        DeferredCallRecord::new(ReceiverDescriptor::of_type("UserMailer"), method)
            .unwrap()
            .with_flavor(JobFlavor::Mailer)
    }

    #[test]
    fn mailer_messages_are_delivered_once() {
        let delivered = Arc::new(AtomicUsize::new(0));
        let executor = DeferredCallExecutor::new(Arc::new(mailer(Arc::clone(&delivered))));

        executor.perform(&mail("greetings")).unwrap();
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mailer_without_message_is_undeliverable() {
        let executor = DeferredCallExecutor::new(Arc::new(mailer(Arc::default())));

        let err = executor.perform(&mail("nothing")).unwrap_err();
        assert!(matches!(err, DeferError::UndeliverableMessage { .. }));
        assert_eq!(
            err.to_string(),
            "UserMailer#nothing returned an undeliverable mail object"
        );
    }

    #[test]
    fn delivery_errors_are_reported() {
        let executor = DeferredCallExecutor::new(Arc::new(mailer(Arc::default())));

        let err = executor.perform(&mail("bounce")).unwrap_err();
        assert!(matches!(err, DeferError::DeliveryFailed { .. }));
    }

    #[test]
    fn keywords_are_absent_when_none_were_captured() {
        let seen: Arc<Mutex<Vec<Option<Map<String, Value>>>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let registry = TypeRegistry::new().with(TypeDef::module("SomeClass").type_method_kw(
            "doit",
            move |call| {
                sink.lock().unwrap().push(call.kwargs().cloned());
                Ok(Returned::Nothing)
            },
        ));
        let executor = DeferredCallExecutor::new(Arc::new(registry));

        let plain = DeferredCallRecord::new(ReceiverDescriptor::of_type("SomeClass"), "doit")
            .unwrap()
            .with_args(vec![json!(1)], Map::new());
        executor.perform(&plain).unwrap();

        let mut keywords = Map::new();
        keywords.insert("force".into(), json!(true));
        executor
            .perform(&plain.clone().with_args(vec![json!(1)], keywords.clone()))
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![None, Some(keywords)]);
    }

    #[test]
    fn unknown_methods_fail_before_the_instance_is_loaded() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let registry = TypeRegistry::new().with(
            TypeDef::<u64>::new("User")
                .with_loader(move |identity| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(serde_json::from_value(identity.clone())?)
                })
                .instance_method("mark_as_awesome", |_, _| Ok(Returned::Nothing)),
        );
        let executor = DeferredCallExecutor::new(Arc::new(registry));
        let user = ReceiverDescriptor::instance("User", &7).unwrap();

        let err = executor
            .perform(&DeferredCallRecord::new(user.clone(), "vanished").unwrap())
            .unwrap_err();
        assert!(matches!(err, DeferError::UnknownMethod { .. }), "{err:?}");
        assert_eq!(loads.load(Ordering::SeqCst), 0);

        executor
            .perform(&DeferredCallRecord::new(user, "mark_as_awesome").unwrap())
            .unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_types_are_unresolvable() {
        let executor = DeferredCallExecutor::new(Arc::new(TypeRegistry::new()));
        let record = DeferredCallRecord::new(ReceiverDescriptor::of_type("Gone"), "doit").unwrap();

        let err = executor.perform(&record).unwrap_err();
        assert!(matches!(err, DeferError::UnresolvableReceiver { .. }));
    }
}
