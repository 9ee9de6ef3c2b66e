//! Record <-> job payload encoding for both proxy strategies.
//!
//! Generic payloads carry `[receiver, method, positional, kwargs?]` as job
//! arguments; the rest of the record lives in the payload envelope (job class,
//! `at`, options) and in the queue name. Legacy payloads carry the whole
//! record serialized as a single string argument.

use chrono::Utc;
use serde_json::{Map, Value};

use deferq_core::record::datetime_to_timestamp;
use deferq_core::{DeferError, DeferResult, DeferredCallRecord, JobFlavor, ReceiverDescriptor, Schedule};
use deferq_queue::JobPayload;

use crate::config::ProxyStrategy;

/// Build the queue payload for `record`.
pub fn encode(record: &DeferredCallRecord, strategy: ProxyStrategy) -> DeferResult<JobPayload> {
    let args = match strategy {
        ProxyStrategy::Generic => {
            let mut args = vec![
                serde_json::to_value(record.receiver())?,
                Value::String(record.method_name().to_string()),
                Value::Array(record.positional_args().to_vec()),
            ];
            if record.has_keyword_args() {
                args.push(Value::Object(record.keyword_args().clone()));
            }
            args
        }
        ProxyStrategy::Legacy => vec![Value::String(serde_json::to_string(record)?)],
    };

    let at = match record.schedule() {
        Schedule::Immediate => None,
        Schedule::At { timestamp } => Some(timestamp),
        Schedule::After { seconds } => Some(datetime_to_timestamp(Utc::now()) + seconds),
    };

    Ok(JobPayload::new(record.flavor().class_name(), args)
        .with_display_class(record.display_name())
        .with_at(at)
        .with_options(record.passthrough().clone()))
}

/// Rebuild the record from a payload taken off `queue`.
pub fn decode(queue: &str, payload: &JobPayload) -> DeferResult<DeferredCallRecord> {
    let record = match payload.args.as_slice() {
        [Value::String(serialized)] => serde_json::from_str::<DeferredCallRecord>(serialized)?,
        [receiver, Value::String(method), Value::Array(positional), rest @ ..] => {
            let keywords = match rest {
                [] => Map::new(),
                [Value::Object(keywords)] => keywords.clone(),
                _ => {
                    return Err(DeferError::serialization(format!(
                        "{}: unexpected trailing job arguments",
                        payload.display_class
                    )));
                }
            };
            let receiver: ReceiverDescriptor = serde_json::from_value(receiver.clone())?;
            let flavor = JobFlavor::from_class_name(&payload.class)
                .ok_or_else(|| DeferError::UnknownFlavor(payload.class.clone()))?;
            let schedule = payload
                .at
                .map_or(Schedule::Immediate, |timestamp| Schedule::At { timestamp });

            DeferredCallRecord::new(receiver, method.as_str())?
                .with_flavor(flavor)
                .with_args(positional.clone(), keywords)
                .with_schedule(schedule)
                .on_queue(queue)
                .with_passthrough(payload.options.clone())
        }
        _ => {
            return Err(DeferError::serialization(format!(
                "{}: job arguments are not a deferred call",
                payload.display_class
            )));
        }
    };

    if record.method_name().trim().is_empty() {
        return Err(DeferError::serialization("deferred call has no method name"));
    }
    Ok(record)
}
