//! Capture/dispatch configuration.

use core::str::FromStr;

use deferq_core::DEFAULT_QUEUE;

/// Arguments whose serialized form is larger than this are logged.
pub const LARGE_ARGUMENT_BYTES: usize = 8192;

/// How a captured call is laid out in the job payload.
///
/// Both strategies decode to the same `DeferredCallRecord`; the choice only
/// matters to tooling that reads raw payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyStrategy {
    /// Receiver, method, arguments and keywords as separate job arguments.
    #[default]
    Generic,
    /// The whole record serialized into a single string argument.
    Legacy,
}

impl FromStr for ProxyStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "generic" => Ok(Self::Generic),
            "legacy" => Ok(Self::Legacy),
            other => Err(ConfigError::Invalid {
                key: "DEFERQ_PROXY",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferConfig {
    /// Queue used when the caller names none
    pub default_queue: String,
    /// Size above which an argument triggers a warning
    pub large_argument_bytes: usize,
    /// Payload layout used unless a proxy overrides it
    pub strategy: ProxyStrategy,
}

impl Default for DeferConfig {
    fn default() -> Self {
        Self {
            default_queue: DEFAULT_QUEUE.to_string(),
            large_argument_bytes: LARGE_ARGUMENT_BYTES,
            strategy: ProxyStrategy::Generic,
        }
    }
}

impl DeferConfig {
    /// Read `DEFERQ_DEFAULT_QUEUE`, `DEFERQ_LARGE_ARGUMENT_BYTES` and
    /// `DEFERQ_PROXY` from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(queue) = lookup("DEFERQ_DEFAULT_QUEUE").filter(|q| !q.trim().is_empty()) {
            config.default_queue = queue;
        }

        if let Some(raw) = lookup("DEFERQ_LARGE_ARGUMENT_BYTES") {
            config.large_argument_bytes =
                raw.trim().parse().map_err(|_| ConfigError::Invalid {
                    key: "DEFERQ_LARGE_ARGUMENT_BYTES",
                    value: raw.clone(),
                })?;
        }

        if let Some(raw) = lookup("DEFERQ_PROXY") {
            config.strategy = raw.parse()?;
        }

        Ok(config)
    }

    pub fn with_default_queue(mut self, queue: impl Into<String>) -> Self {
        self.default_queue = queue.into();
        self
    }

    pub fn with_large_argument_bytes(mut self, bytes: usize) -> Self {
        self.large_argument_bytes = bytes;
        self
    }

    pub fn with_strategy(mut self, strategy: ProxyStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = DeferConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, DeferConfig::default());
        assert_eq!(config.default_queue, "default");
        assert_eq!(config.large_argument_bytes, 8192);
    }

    #[test]
    fn reads_all_keys() {
        let config = DeferConfig::from_lookup(lookup(&[
            ("DEFERQ_DEFAULT_QUEUE", "low"),
            ("DEFERQ_LARGE_ARGUMENT_BYTES", "1024"),
            ("DEFERQ_PROXY", "Legacy"),
        ]))
        .unwrap();
        assert_eq!(config.default_queue, "low");
        assert_eq!(config.large_argument_bytes, 1024);
        assert_eq!(config.strategy, ProxyStrategy::Legacy);
    }

    #[test]
    fn rejects_bad_values() {
        let err = DeferConfig::from_lookup(lookup(&[("DEFERQ_PROXY", "dynamic")])).unwrap_err();
        assert!(err.to_string().contains("DEFERQ_PROXY"));

        let err = DeferConfig::from_lookup(lookup(&[("DEFERQ_LARGE_ARGUMENT_BYTES", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("lots"));
    }
}
