//! Deferred method calls.
//!
//! Capture a method call on a type or an instance, hand it to a job queue, and
//! replay it later on a worker:
//!
//! - [`Deferrable`] entry points (`defer`, `defer_for`, `defer_until`) return a
//!   [`CallProxy`] that records exactly one call
//! - [`Dispatcher`] encodes the record (see [`codec`]) and submits it now or
//!   into the scheduled set
//! - [`DeferredCallExecutor`] decodes the job, resolves the receiver through a
//!   [`TypeRegistry`] and calls the method; mailer calls also deliver the
//!   composed message

pub mod arguments;
pub mod codec;
pub mod config;
pub mod deferrable;
pub mod dispatch;
pub mod executor;
pub mod mail;
pub mod proxy;
pub mod registry;

pub use arguments::{Arguments, Invocation};
pub use config::{ConfigError, DeferConfig, LARGE_ARGUMENT_BYTES, ProxyStrategy};
pub use deferrable::{Deferrable, TypeRef};
pub use dispatch::Dispatcher;
pub use executor::DeferredCallExecutor;
pub use mail::Deliverable;
pub use proxy::{CallProxy, PROXY_METHODS};
pub use registry::{ReceiverType, Returned, TypeDef, TypeRegistry};

pub use deferq_core::{
    DeferError, DeferResult, DeferredCallRecord, EnqueueOptions, JobFlavor, JobId,
    ReceiverDescriptor, Schedule,
};
