//! Deferred-call error model.

use thiserror::Error;

/// Result type used across capture, dispatch and execution.
pub type DeferResult<T> = Result<T, DeferError>;

/// Everything that can go wrong between capturing a call and replaying it.
///
/// Submission-time variants (`Serialization`, `QueueUnavailable`,
/// `InvalidCall`, `InvalidSchedule`) are returned to the caller synchronously.
/// The rest surface inside the worker and are handed to the queue's failure
/// path unchanged. Nothing here is recovered locally.
#[derive(Debug, Error)]
pub enum DeferError {
    /// A receiver, argument or payload could not be converted to or from
    /// transport form.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The job queue refused or could not accept the job.
    #[error("job queue unavailable: {0}")]
    QueueUnavailable(String),

    /// The recorded type no longer resolves to a live definition, or an
    /// instance could not be rebuilt from its identity.
    #[error("cannot resolve receiver `{type_name}`: {reason}")]
    UnresolvableReceiver { type_name: String, reason: String },

    /// The receiver resolved but does not respond to the recorded method.
    #[error("`{type_name}` does not respond to `{method}`")]
    UnknownMethod { type_name: String, method: String },

    /// Keyword arguments were recorded for a method that only takes
    /// positional arguments.
    #[error("{type_name}.{method} does not accept keyword arguments")]
    ArgumentMismatch { type_name: String, method: String },

    /// A mailer method returned nothing deliverable.
    #[error("{type_name}#{method} returned an undeliverable mail object")]
    UndeliverableMessage { type_name: String, method: String },

    /// Delivering a composed message failed.
    #[error("delivering mail from {type_name}#{method} failed: {source}")]
    DeliveryFailed {
        type_name: String,
        method: String,
        #[source]
        source: anyhow::Error,
    },

    /// The target method itself failed; its error is carried unchanged.
    #[error("{type_name}.{method} failed: {source}")]
    MethodFailed {
        type_name: String,
        method: String,
        #[source]
        source: anyhow::Error,
    },

    /// The call cannot be deferred (empty or proxy-reserved method name).
    #[error("invalid deferred call: {0}")]
    InvalidCall(String),

    /// A schedule timestamp is not representable.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// A job names a class no deferred-call flavor handles.
    #[error("unknown job flavor: {0}")]
    UnknownFlavor(String),
}

impl DeferError {
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    pub fn queue_unavailable(msg: impl Into<String>) -> Self {
        Self::QueueUnavailable(msg.into())
    }

    pub fn unresolvable(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnresolvableReceiver {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_call(msg: impl Into<String>) -> Self {
        Self::InvalidCall(msg.into())
    }

    /// Whether the error was raised before the job reached the queue.
    pub fn is_submission_error(&self) -> bool {
        matches!(
            self,
            DeferError::Serialization(_)
                | DeferError::QueueUnavailable(_)
                | DeferError::InvalidCall(_)
                | DeferError::InvalidSchedule(_)
        )
    }
}

impl From<serde_json::Error> for DeferError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}
