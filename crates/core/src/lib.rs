//! `deferq-core` — the vocabulary shared by capture, dispatch and execution.
//!
//! This crate holds **pure data**: identifiers, the deferred-call record and
//! its receiver/schedule descriptors, enqueue options, and the error taxonomy.
//! No queue, registry or runtime concerns live here.

pub mod error;
pub mod id;
pub mod options;
pub mod record;

pub use error::{DeferError, DeferResult};
pub use id::JobId;
pub use options::EnqueueOptions;
pub use record::{DeferredCallRecord, JobFlavor, ReceiverDescriptor, Schedule};

/// Queue used when neither the caller nor the configuration names one.
pub const DEFAULT_QUEUE: &str = "default";
