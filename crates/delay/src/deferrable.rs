//! Entry points: `defer`, `defer_for`, `defer_until`.

use std::borrow::Cow;
use std::time::Duration;

use chrono::{DateTime, Utc};

use deferq_core::record::datetime_to_timestamp;
use deferq_core::{DeferResult, EnqueueOptions, JobFlavor, ReceiverDescriptor};
use deferq_queue::JobQueue;

use crate::dispatch::Dispatcher;
use crate::proxy::CallProxy;

/// Anything whose method calls can be captured and run later.
///
/// Types and modules are usually referred to through [`TypeRef`]. Instances
/// implement this trait themselves, typically with
/// [`ReceiverDescriptor::instance`] over an id or a small value object:
///
/// ```ignore
/// impl Deferrable for User {
///     fn receiver_descriptor(&self) -> DeferResult<ReceiverDescriptor> {
///         ReceiverDescriptor::instance("User", &self.id)
///     }
/// }
///
/// user.defer(&dispatcher).call("mark_as_awesome", Arguments::new())?;
/// ```
pub trait Deferrable {
    /// How the receiver is recorded in the job.
    fn receiver_descriptor(&self) -> DeferResult<ReceiverDescriptor>;

    /// Which flavor replays calls on this receiver.
    fn job_flavor(&self) -> JobFlavor {
        JobFlavor::Model
    }

    /// Capture the next call and run it as soon as a worker picks it up.
    fn defer<'a, Q: JobQueue>(&'a self, dispatcher: &'a Dispatcher<Q>) -> CallProxy<'a, Q>
    where
        Self: Sized,
    {
        CallProxy::new(dispatcher, self, EnqueueOptions::new())
    }

    /// Capture the next call and run it once `interval` has elapsed.
    fn defer_for<'a, Q: JobQueue>(
        &'a self,
        dispatcher: &'a Dispatcher<Q>,
        interval: Duration,
    ) -> CallProxy<'a, Q>
    where
        Self: Sized,
    {
        let at = datetime_to_timestamp(Utc::now()) + interval.as_secs_f64();
        CallProxy::new(dispatcher, self, EnqueueOptions::new().at(at))
    }

    /// Capture the next call and run it at `at`.
    fn defer_until<'a, Q: JobQueue>(
        &'a self,
        dispatcher: &'a Dispatcher<Q>,
        at: DateTime<Utc>,
    ) -> CallProxy<'a, Q>
    where
        Self: Sized,
    {
        CallProxy::new(dispatcher, self, EnqueueOptions::new().at_time(at))
    }
}

/// A type, module or mailer referred to by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeRef {
    name: Cow<'static, str>,
    flavor: JobFlavor,
}

impl TypeRef {
    /// A plain type or module.
    pub const fn class(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            flavor: JobFlavor::Class,
        }
    }

    /// A persisted model type.
    pub const fn model(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            flavor: JobFlavor::Model,
        }
    }

    /// A mailer: deferred calls compose a message which is then delivered.
    pub const fn mailer(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            flavor: JobFlavor::Mailer,
        }
    }

    pub fn named(name: impl Into<String>, flavor: JobFlavor) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            flavor,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Deferrable for TypeRef {
    fn receiver_descriptor(&self) -> DeferResult<ReceiverDescriptor> {
        Ok(ReceiverDescriptor::of_type(self.name.as_ref()))
    }

    fn job_flavor(&self) -> JobFlavor {
        self.flavor
    }
}
