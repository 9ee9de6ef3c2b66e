//! The deferred-call record and its descriptors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DeferError, DeferResult};
use crate::DEFAULT_QUEUE;

/// What the deferred method is called on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReceiverDescriptor {
    /// The receiver is a type or module itself.
    Type { type_name: String },
    /// The receiver is a specific object, rebuilt from `identity` at run time.
    Instance { type_name: String, identity: Value },
}

impl ReceiverDescriptor {
    pub fn of_type(type_name: impl Into<String>) -> Self {
        Self::Type {
            type_name: type_name.into(),
        }
    }

    /// Describe an instance by serializing its identity.
    ///
    /// Pass an id or a small value object where possible; whole records work
    /// but end up inline in every job payload.
    pub fn instance<T>(type_name: impl Into<String>, identity: &T) -> DeferResult<Self>
    where
        T: Serialize + ?Sized,
    {
        let type_name = type_name.into();
        let identity = serde_json::to_value(identity).map_err(|e| {
            DeferError::serialization(format!("receiver `{type_name}`: {e}"))
        })?;
        Ok(Self::Instance {
            type_name,
            identity,
        })
    }

    pub fn type_name(&self) -> &str {
        match self {
            ReceiverDescriptor::Type { type_name } => type_name,
            ReceiverDescriptor::Instance { type_name, .. } => type_name,
        }
    }

    pub fn is_type(&self) -> bool {
        matches!(self, ReceiverDescriptor::Type { .. })
    }
}

/// When a deferred call should run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// As soon as a worker dequeues it.
    Immediate,
    /// After `seconds` have elapsed, measured from submission.
    After { seconds: f64 },
    /// At an absolute unix timestamp (seconds, fractional).
    At { timestamp: f64 },
}

impl Default for Schedule {
    fn default() -> Self {
        Self::Immediate
    }
}

impl Schedule {
    pub fn at(when: DateTime<Utc>) -> Self {
        Self::At {
            timestamp: datetime_to_timestamp(when),
        }
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, Schedule::Immediate)
    }

    /// Resolve to an absolute instant relative to `now`.
    ///
    /// `None` means "enqueue now".
    pub fn resolve(&self, now: DateTime<Utc>) -> DeferResult<Option<DateTime<Utc>>> {
        match *self {
            Schedule::Immediate => Ok(None),
            Schedule::After { seconds } => {
                timestamp_to_datetime(datetime_to_timestamp(now) + seconds).map(Some)
            }
            Schedule::At { timestamp } => timestamp_to_datetime(timestamp).map(Some),
        }
    }
}

/// Convert a fractional unix timestamp into a UTC instant (microsecond precision).
pub fn timestamp_to_datetime(timestamp: f64) -> DeferResult<DateTime<Utc>> {
    if !timestamp.is_finite() {
        return Err(DeferError::InvalidSchedule(format!(
            "timestamp {timestamp} is not finite"
        )));
    }
    let micros = (timestamp * 1_000_000.0).round();
    if micros < i64::MIN as f64 || micros > i64::MAX as f64 {
        return Err(DeferError::InvalidSchedule(format!(
            "timestamp {timestamp} is out of range"
        )));
    }
    DateTime::from_timestamp_micros(micros as i64).ok_or_else(|| {
        DeferError::InvalidSchedule(format!("timestamp {timestamp} is out of range"))
    })
}

pub fn datetime_to_timestamp(when: DateTime<Utc>) -> f64 {
    when.timestamp_micros() as f64 / 1_000_000.0
}

/// Job flavor: which `perform` variant replays the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobFlavor {
    /// Any type or module method; return value discarded.
    Class,
    /// Persisted-model methods (type or instance); return value discarded.
    Model,
    /// Mailer methods; the returned message is delivered.
    Mailer,
}

impl JobFlavor {
    pub const ALL: [JobFlavor; 3] = [JobFlavor::Class, JobFlavor::Model, JobFlavor::Mailer];

    /// Job class name the worker routes on.
    pub fn class_name(&self) -> &'static str {
        match self {
            JobFlavor::Class => "DelayedClass",
            JobFlavor::Model => "DelayedModel",
            JobFlavor::Mailer => "DelayedMailer",
        }
    }

    pub fn from_class_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.class_name() == name)
    }
}

/// A captured method call, ready to be handed to the job queue.
///
/// Built once at capture time and never mutated afterwards; the `with_*`
/// methods consume the value and are only used while assembling it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredCallRecord {
    flavor: JobFlavor,
    receiver: ReceiverDescriptor,
    method_name: String,
    #[serde(default)]
    positional_args: Vec<Value>,
    #[serde(default)]
    keyword_args: Map<String, Value>,
    #[serde(default)]
    schedule: Schedule,
    queue_name: String,
    #[serde(default)]
    passthrough: Map<String, Value>,
}

impl DeferredCallRecord {
    /// Start a record for `receiver.method_name()` with no arguments, on the
    /// default queue, to run immediately.
    pub fn new(receiver: ReceiverDescriptor, method_name: impl Into<String>) -> DeferResult<Self> {
        let method_name = method_name.into();
        if method_name.trim().is_empty() {
            return Err(DeferError::invalid_call(format!(
                "empty method name for receiver `{}`",
                receiver.type_name()
            )));
        }
        Ok(Self {
            flavor: JobFlavor::Class,
            receiver,
            method_name,
            positional_args: Vec::new(),
            keyword_args: Map::new(),
            schedule: Schedule::Immediate,
            queue_name: DEFAULT_QUEUE.to_string(),
            passthrough: Map::new(),
        })
    }

    pub fn with_flavor(mut self, flavor: JobFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    pub fn with_args(mut self, positional: Vec<Value>, keywords: Map<String, Value>) -> Self {
        self.positional_args = positional;
        self.keyword_args = keywords;
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn on_queue(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = queue_name.into();
        self
    }

    pub fn with_passthrough(mut self, passthrough: Map<String, Value>) -> Self {
        self.passthrough = passthrough;
        self
    }

    pub fn flavor(&self) -> JobFlavor {
        self.flavor
    }

    pub fn receiver(&self) -> &ReceiverDescriptor {
        &self.receiver
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn positional_args(&self) -> &[Value] {
        &self.positional_args
    }

    pub fn keyword_args(&self) -> &Map<String, Value> {
        &self.keyword_args
    }

    /// Whether the call must be replayed with a keyword form at all.
    pub fn has_keyword_args(&self) -> bool {
        !self.keyword_args.is_empty()
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn passthrough(&self) -> &Map<String, Value> {
        &self.passthrough
    }

    /// Human-readable `Type.method` name shown by queue tooling.
    pub fn display_name(&self) -> String {
        format!("{}.{}", self.receiver.type_name(), self.method_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_method_name_is_rejected() {
        let err = DeferredCallRecord::new(ReceiverDescriptor::of_type("MyModel"), "  ").unwrap_err();
        assert!(matches!(err, DeferError::InvalidCall(_)));
    }

    #[test]
    fn display_name_joins_type_and_method() {
        let record =
            DeferredCallRecord::new(ReceiverDescriptor::of_type("MyModel"), "long_class_method")
                .unwrap();
        assert_eq!(record.display_name(), "MyModel.long_class_method");
        assert_eq!(record.queue_name(), "default");
        assert!(record.schedule().is_immediate());
        assert!(!record.has_keyword_args());
    }

    #[test]
    fn instance_display_name_uses_type() {
        let receiver = ReceiverDescriptor::instance("User", &json!({"id": 7})).unwrap();
        let record = DeferredCallRecord::new(receiver, "mark_as_awesome").unwrap();
        assert_eq!(record.display_name(), "User.mark_as_awesome");
        assert!(!record.receiver().is_type());
    }

    #[test]
    fn keyword_flag_follows_map() {
        let mut kwargs = Map::new();
        kwargs.insert("urgent".into(), json!(true));
        let record = DeferredCallRecord::new(ReceiverDescriptor::of_type("SomeClass"), "doit")
            .unwrap()
            .with_args(vec![json!(1)], kwargs);
        assert!(record.has_keyword_args());
    }

    #[test]
    fn after_resolves_relative_to_now() {
        let now = Utc::now();
        let resolved = Schedule::After { seconds: 60.0 }.resolve(now).unwrap().unwrap();
        let delta = (resolved - now).num_milliseconds();
        assert!((59_999..=60_001).contains(&delta), "delta was {delta}");
    }

    #[test]
    fn at_round_trips_through_timestamp() {
        let when = DateTime::from_timestamp(1_700_000_000, 250_000_000).unwrap();
        let resolved = Schedule::at(when).resolve(Utc::now()).unwrap();
        assert_eq!(resolved, Some(when));
    }

    #[test]
    fn non_finite_timestamp_is_invalid() {
        let err = Schedule::At { timestamp: f64::NAN }.resolve(Utc::now()).unwrap_err();
        assert!(matches!(err, DeferError::InvalidSchedule(_)));
    }

    #[test]
    fn flavor_class_names_round_trip() {
        for flavor in JobFlavor::ALL {
            assert_eq!(JobFlavor::from_class_name(flavor.class_name()), Some(flavor));
        }
        assert_eq!(JobFlavor::from_class_name("HardWorker"), None);
    }
}
