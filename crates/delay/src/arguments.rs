//! Call arguments: captured on the caller side, replayed on the worker side.

use anyhow::Context;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use deferq_core::{DeferError, DeferResult};

/// Arguments for a deferred call, serialized as they are added.
///
/// Serialization failures are remembered and reported when the call is
/// submitted, so call sites can chain `.arg(..)` without `?` on every step.
#[derive(Debug, Default)]
pub struct Arguments {
    positional: Vec<Value>,
    keywords: Map<String, Value>,
    error: Option<String>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(v) => self.positional.push(v),
            Err(e) => self.remember(format!("argument {}: {e}", self.positional.len())),
        }
        self
    }

    /// Set a keyword argument.
    pub fn kwarg<T: Serialize + ?Sized>(mut self, name: impl Into<String>, value: &T) -> Self {
        let name = name.into();
        match serde_json::to_value(value) {
            Ok(v) => {
                self.keywords.insert(name, v);
            }
            Err(e) => self.remember(format!("keyword argument `{name}`: {e}")),
        }
        self
    }

    fn remember(&mut self, error: String) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Split into transport-form positional and keyword arguments.
    pub fn into_parts(self) -> DeferResult<(Vec<Value>, Map<String, Value>)> {
        match self.error {
            Some(error) => Err(DeferError::serialization(error)),
            None => Ok((self.positional, self.keywords)),
        }
    }
}

impl From<Vec<Value>> for Arguments {
    fn from(positional: Vec<Value>) -> Self {
        Self {
            positional,
            ..Self::default()
        }
    }
}

/// Recorded arguments as seen by the target method at replay time.
///
/// `kwargs` is `None` when the call was captured without keyword arguments,
/// so positional-only methods never see a keyword form.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    args: &'a [Value],
    kwargs: Option<&'a Map<String, Value>>,
}

impl<'a> Invocation<'a> {
    pub fn new(args: &'a [Value], kwargs: Option<&'a Map<String, Value>>) -> Self {
        Self { args, kwargs }
    }

    pub fn args(&self) -> &'a [Value] {
        self.args
    }

    pub fn kwargs(&self) -> Option<&'a Map<String, Value>> {
        self.kwargs
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Deserialize positional argument `index`.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> anyhow::Result<T> {
        let value = self
            .args
            .get(index)
            .with_context(|| format!("missing argument {index} (got {})", self.args.len()))?;
        serde_json::from_value(value.clone())
            .with_context(|| format!("argument {index} has the wrong shape"))
    }

    /// Deserialize keyword argument `name`, if it was given.
    pub fn kwarg<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<Option<T>> {
        match self.kwargs.and_then(|k| k.get(name)) {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .with_context(|| format!("keyword argument `{name}` has the wrong shape")),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::ser::Error as _;
    use serde_json::json;

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("socket handles cannot be serialized"))
        }
    }

    #[test]
    fn collects_positional_and_keywords() {
        let (args, kwargs) = Arguments::new()
            .arg(&1)
            .arg("two")
            .kwarg("urgent", &true)
            .into_parts()
            .unwrap();
        assert_eq!(args, vec![json!(1), json!("two")]);
        assert_eq!(kwargs.get("urgent"), Some(&json!(true)));
    }

    #[test]
    fn first_serialization_error_surfaces_on_submit() {
        let err = Arguments::new()
            .arg(&1)
            .arg(&Unserializable)
            .kwarg("also", &Unserializable)
            .into_parts()
            .unwrap_err();
        match err {
            DeferError::Serialization(msg) => assert!(msg.starts_with("argument 1")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn invocation_reads_typed_arguments() {
        let args = vec![json!(1), json!([2, 3])];
        let mut kwargs = Map::new();
        kwargs.insert("name".into(), json!("ada"));
        let inv = Invocation::new(&args, Some(&kwargs));

        assert_eq!(inv.arg::<u32>(0).unwrap(), 1);
        assert_eq!(inv.arg::<Vec<u8>>(1).unwrap(), vec![2, 3]);
        assert!(inv.arg::<u32>(2).is_err());
        assert_eq!(inv.kwarg::<String>("name").unwrap().as_deref(), Some("ada"));
        assert_eq!(inv.kwarg::<String>("other").unwrap(), None);
    }
}
