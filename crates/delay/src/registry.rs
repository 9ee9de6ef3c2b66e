//! Live type lookup for replaying deferred calls.
//!
//! A worker can only call methods it knows about. Each type that may receive
//! deferred calls is registered as a [`TypeDef`]: its type-level methods, its
//! instance methods, and how to rebuild an instance from a recorded identity.
//! The executor resolves a record's `type_name` here at run time; a type that
//! has since been removed simply fails to resolve.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use deferq_core::{DeferError, DeferResult, ReceiverDescriptor};

use crate::arguments::Invocation;
use crate::mail::Deliverable;

/// What a target method handed back.
#[derive(Debug)]
pub enum Returned {
    /// No meaningful return value.
    Nothing,
    /// A plain value.
    Value(Value),
    /// A composed, undelivered mail message.
    Message(Box<dyn Deliverable>),
}

impl Returned {
    pub fn message(message: impl Deliverable + 'static) -> Self {
        Self::Message(Box::new(message))
    }

    /// `Nothing`, `null` and `false` count as "no result".
    pub fn is_falsy(&self) -> bool {
        matches!(
            self,
            Returned::Nothing | Returned::Value(Value::Null) | Returned::Value(Value::Bool(false))
        )
    }
}

impl From<Value> for Returned {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

type TypeMethodFn = Box<dyn Fn(&Invocation<'_>) -> anyhow::Result<Returned> + Send + Sync>;
type InstanceMethodFn<T> =
    Box<dyn Fn(&T, &Invocation<'_>) -> anyhow::Result<Returned> + Send + Sync>;
type LoaderFn<T> = Box<dyn Fn(&Value) -> anyhow::Result<T> + Send + Sync>;

struct Method<F> {
    call: F,
    keywords: bool,
}

/// A type that can be resolved by name and have methods replayed on it.
pub trait ReceiverType: Send + Sync {
    fn type_name(&self) -> &str;

    /// Whether `method` exists for this kind of receiver (type or instance).
    fn responds_to(&self, receiver: &ReceiverDescriptor, method: &str) -> bool;

    /// Rebuild the receiver if needed and call `method` on it.
    fn invoke(
        &self,
        receiver: &ReceiverDescriptor,
        method: &str,
        call: &Invocation<'_>,
    ) -> DeferResult<Returned>;
}

/// Method table for one named type.
///
/// `T` is the instance type rebuilt from a recorded identity. Types that are
/// only ever called at the type level use [`TypeDef::module`].
pub struct TypeDef<T> {
    name: String,
    type_methods: HashMap<String, Method<TypeMethodFn>>,
    instance_methods: HashMap<String, Method<InstanceMethodFn<T>>>,
    loader: LoaderFn<T>,
}

impl<T: DeserializeOwned + 'static> TypeDef<T> {
    /// Instances are rebuilt by deserializing the recorded identity into `T`.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_loader_fn(
            name.into(),
            Box::new(|identity: &Value| -> anyhow::Result<T> {
                Ok(serde_json::from_value(identity.clone())?)
            }),
        )
    }
}

impl TypeDef<()> {
    /// A type or module without instances.
    pub fn module(name: impl Into<String>) -> Self {
        let name = name.into();
        let label = name.clone();
        Self::with_loader_fn(
            name,
            Box::new(move |_: &Value| -> anyhow::Result<()> {
                anyhow::bail!("`{label}` has no instances")
            }),
        )
    }
}

impl<T: 'static> TypeDef<T> {
    fn with_loader_fn(name: String, loader: LoaderFn<T>) -> Self {
        Self {
            name,
            type_methods: HashMap::new(),
            instance_methods: HashMap::new(),
            loader,
        }
    }

    /// Rebuild instances with a custom lookup, e.g. fetching a row by id.
    pub fn with_loader<F>(mut self, loader: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.loader = Box::new(loader);
        self
    }

    /// Register a positional-only type-level method.
    pub fn type_method<F>(self, name: impl Into<String>, call: F) -> Self
    where
        F: Fn(&Invocation<'_>) -> anyhow::Result<Returned> + Send + Sync + 'static,
    {
        self.add_type_method(name.into(), Box::new(call), false)
    }

    /// Register a type-level method that accepts keyword arguments.
    pub fn type_method_kw<F>(self, name: impl Into<String>, call: F) -> Self
    where
        F: Fn(&Invocation<'_>) -> anyhow::Result<Returned> + Send + Sync + 'static,
    {
        self.add_type_method(name.into(), Box::new(call), true)
    }

    /// Register a positional-only instance method.
    pub fn instance_method<F>(self, name: impl Into<String>, call: F) -> Self
    where
        F: Fn(&T, &Invocation<'_>) -> anyhow::Result<Returned> + Send + Sync + 'static,
    {
        self.add_instance_method(name.into(), Box::new(call), false)
    }

    /// Register an instance method that accepts keyword arguments.
    pub fn instance_method_kw<F>(self, name: impl Into<String>, call: F) -> Self
    where
        F: Fn(&T, &Invocation<'_>) -> anyhow::Result<Returned> + Send + Sync + 'static,
    {
        self.add_instance_method(name.into(), Box::new(call), true)
    }

    fn add_type_method(mut self, name: String, call: TypeMethodFn, keywords: bool) -> Self {
        self.type_methods.insert(name, Method { call, keywords });
        self
    }

    fn add_instance_method(
        mut self,
        name: String,
        call: InstanceMethodFn<T>,
        keywords: bool,
    ) -> Self {
        self.instance_methods.insert(name, Method { call, keywords });
        self
    }

    fn unknown_method(&self, method: &str) -> DeferError {
        DeferError::UnknownMethod {
            type_name: self.name.clone(),
            method: method.to_string(),
        }
    }

    fn check_keywords(&self, method: &str, accepts: bool, call: &Invocation<'_>) -> DeferResult<()> {
        if call.kwargs().is_some() && !accepts {
            return Err(DeferError::ArgumentMismatch {
                type_name: self.name.clone(),
                method: method.to_string(),
            });
        }
        Ok(())
    }

    fn method_failed(&self, method: &str, source: anyhow::Error) -> DeferError {
        DeferError::MethodFailed {
            type_name: self.name.clone(),
            method: method.to_string(),
            source,
        }
    }
}

impl<T: 'static> ReceiverType for TypeDef<T> {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn responds_to(&self, receiver: &ReceiverDescriptor, method: &str) -> bool {
        match receiver {
            ReceiverDescriptor::Type { .. } => self.type_methods.contains_key(method),
            ReceiverDescriptor::Instance { .. } => self.instance_methods.contains_key(method),
        }
    }

    fn invoke(
        &self,
        receiver: &ReceiverDescriptor,
        method: &str,
        call: &Invocation<'_>,
    ) -> DeferResult<Returned> {
        match receiver {
            ReceiverDescriptor::Type { .. } => {
                let target = self
                    .type_methods
                    .get(method)
                    .ok_or_else(|| self.unknown_method(method))?;
                self.check_keywords(method, target.keywords, call)?;
                (target.call)(call).map_err(|e| self.method_failed(method, e))
            }
            ReceiverDescriptor::Instance { identity, .. } => {
                let instance = (self.loader)(identity)
                    .map_err(|e| DeferError::unresolvable(&self.name, format!("{e:#}")))?;
                let target = self
                    .instance_methods
                    .get(method)
                    .ok_or_else(|| self.unknown_method(method))?;
                self.check_keywords(method, target.keywords, call)?;
                (target.call)(&instance, call).map_err(|e| self.method_failed(method, e))
            }
        }
    }
}

/// Name → type lookup shared by dispatchers and executors.
#[derive(Default, Clone)]
pub struct TypeRegistry {
    types: HashMap<String, Arc<dyn ReceiverType>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a type under its own name.
    pub fn register<R>(&mut self, def: R) -> &mut Self
    where
        R: ReceiverType + 'static,
    {
        self.types.insert(def.type_name().to_string(), Arc::new(def));
        self
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<R>(mut self, def: R) -> Self
    where
        R: ReceiverType + 'static,
    {
        self.register(def);
        self
    }

    /// Drop a type, e.g. to model code that no longer exists.
    pub fn unregister(&mut self, type_name: &str) -> bool {
        self.types.remove(type_name).is_some()
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    pub fn resolve(&self, type_name: &str) -> DeferResult<Arc<dyn ReceiverType>> {
        self.types
            .get(type_name)
            .cloned()
            .ok_or_else(|| DeferError::unresolvable(type_name, "no such type is registered"))
    }

    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl core::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}
