//! Caller-supplied enqueue options.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::{DeferError, DeferResult};
use crate::record::{datetime_to_timestamp, Schedule};

/// Options attached to a capture proxy.
///
/// `queue` and `at` are interpreted by this layer; everything else
/// (`retry`, `backtrace`, custom keys) is forwarded to the job queue as-is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnqueueOptions {
    queue: Option<String>,
    at: Option<f64>,
    passthrough: Map<String, Value>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a loose option bag such as `{"queue": "mailers", "retry": 3}`.
    ///
    /// `queue` may be any scalar and is stringified; `at` must be numeric.
    pub fn from_value(value: Value) -> DeferResult<Self> {
        let Value::Object(map) = value else {
            return Err(DeferError::invalid_call("enqueue options must be an object"));
        };

        let mut options = Self::default();
        for (key, value) in map {
            options.insert(key, value)?;
        }
        Ok(options)
    }

    fn insert(&mut self, key: String, value: Value) -> DeferResult<()> {
        match key.as_str() {
            "queue" => {
                self.queue = match value {
                    Value::String(s) => Some(s),
                    Value::Null => None,
                    other => Some(other.to_string()),
                };
            }
            "at" => {
                let ts = value.as_f64().ok_or_else(|| {
                    DeferError::InvalidSchedule(format!("`at` must be a number, got {value}"))
                })?;
                self.at = Some(ts);
            }
            _ => {
                self.passthrough.insert(key, value);
            }
        }
        Ok(())
    }

    pub fn queue(mut self, name: impl Into<String>) -> Self {
        self.queue = Some(name.into());
        self
    }

    /// Run at an absolute unix timestamp.
    pub fn at(mut self, timestamp: f64) -> Self {
        self.at = Some(timestamp);
        self
    }

    pub fn at_time(self, when: DateTime<Utc>) -> Self {
        self.at(datetime_to_timestamp(when))
    }

    pub fn retry(mut self, retry: impl Into<Value>) -> Self {
        self.passthrough.insert("retry".into(), retry.into());
        self
    }

    pub fn backtrace(mut self, backtrace: impl Into<Value>) -> Self {
        self.passthrough.insert("backtrace".into(), backtrace.into());
        self
    }

    /// Set one option by key. `queue` and `at` are interpreted as in
    /// [`from_value`](Self::from_value); other keys are forwarded to the queue.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> DeferResult<Self> {
        self.insert(key.into(), value.into())?;
        Ok(self)
    }

    /// Overlay `other` on top of `self`; keys set in `other` win.
    pub fn merge(mut self, other: EnqueueOptions) -> Self {
        if other.queue.is_some() {
            self.queue = other.queue;
        }
        if other.at.is_some() {
            self.at = other.at;
        }
        self.passthrough.extend(other.passthrough);
        self
    }

    pub fn queue_name(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    pub fn timestamp(&self) -> Option<f64> {
        self.at
    }

    /// `At` when a timestamp was given, otherwise `Immediate`.
    pub fn schedule(&self) -> Schedule {
        match self.at {
            Some(timestamp) => Schedule::At { timestamp },
            None => Schedule::Immediate,
        }
    }

    pub fn passthrough(&self) -> &Map<String, Value> {
        &self.passthrough
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stringifies_queue_and_splits_passthrough() {
        let options =
            EnqueueOptions::from_value(json!({"queue": "notdefault", "retry": false, "at": 12.5}))
                .unwrap();
        assert_eq!(options.queue_name(), Some("notdefault"));
        assert_eq!(options.schedule(), Schedule::At { timestamp: 12.5 });
        assert_eq!(options.passthrough().get("retry"), Some(&json!(false)));
        assert!(!options.passthrough().contains_key("queue"));
    }

    #[test]
    fn numeric_queue_is_stringified() {
        let options = EnqueueOptions::from_value(json!({"queue": 5})).unwrap();
        assert_eq!(options.queue_name(), Some("5"));
    }

    #[test]
    fn non_numeric_at_is_rejected() {
        let err = EnqueueOptions::from_value(json!({"at": "tomorrow"})).unwrap_err();
        assert!(matches!(err, DeferError::InvalidSchedule(_)));
    }

    #[test]
    fn merge_prefers_later_values() {
        let merged = EnqueueOptions::new()
            .queue("a")
            .retry(3)
            .merge(EnqueueOptions::new().at(99.0).retry(5));
        assert_eq!(merged.queue_name(), Some("a"));
        assert_eq!(merged.timestamp(), Some(99.0));
        assert_eq!(merged.passthrough().get("retry"), Some(&json!(5)));
    }

    #[test]
    fn set_interprets_queue_and_at() {
        let options = EnqueueOptions::new()
            .set("queue", "other")
            .and_then(|o| o.set("at", 42.0))
            .and_then(|o| o.set("backtrace", true))
            .unwrap();
        assert_eq!(options.queue_name(), Some("other"));
        assert_eq!(options.schedule(), Schedule::At { timestamp: 42.0 });
        assert_eq!(options.passthrough().len(), 1);
        assert_eq!(options.passthrough().get("backtrace"), Some(&json!(true)));

        let err = EnqueueOptions::new().set("at", "soon").unwrap_err();
        assert!(matches!(err, DeferError::InvalidSchedule(_)));
    }

    #[test]
    fn no_timestamp_means_immediate() {
        assert!(EnqueueOptions::new().schedule().is_immediate());
    }
}
