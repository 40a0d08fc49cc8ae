//! Configuration structures.
//!
//! Configuration is loaded from environment variables and config files.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use super::errors::{Error, Result};
use super::protocol::{parse_protocol_list, Protocol};

/// Environment variable holding the comma-separated protocol allow-list.
pub const PROTOCOLS_ENV: &str = "POLYPORT_PROTOCOLS";

/// Environment variable enabling the file watcher.
pub const WATCH_ENV: &str = "POLYPORT_WATCH";

/// Settings handed to one adapter's `setup`.
pub type AdapterSettings = Map<String, Value>;

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Per-protocol adapter settings. A section's presence also requests
    /// that protocol.
    pub adapters: BTreeMap<Protocol, AdapterSettings>,

    /// Restart the process when a watched file changes.
    pub watch: bool,

    /// Poll interval of the file watcher.
    #[serde(with = "humantime_serde")]
    pub watch_interval: Duration,

    /// Comma-separated allow-list; overrides everything else when non-empty.
    /// When unset, `POLYPORT_PROTOCOLS` is read at resolution time.
    pub protocols_override: Option<String>,

    /// Observability configuration.
    pub observability: ObservabilityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            adapters: BTreeMap::new(),
            watch: false,
            watch_interval: Duration::from_secs(1),
            protocols_override: None,
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Config {
    /// Defaults plus the environment overrides.
    pub fn from_env() -> Self {
        Self::default().merge_env()
    }

    /// Load a JSON config file, then apply the environment overrides.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&raw)?;
        Ok(config.merge_env())
    }

    fn merge_env(mut self) -> Self {
        if let Ok(raw) = std::env::var(PROTOCOLS_ENV) {
            if !raw.trim().is_empty() {
                self.protocols_override = Some(raw);
            }
        }
        if let Ok(raw) = std::env::var(WATCH_ENV) {
            self.watch = matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        self
    }

    /// Add or replace one adapter section. Non-object values are ignored.
    pub fn with_adapter(mut self, protocol: Protocol, settings: Value) -> Self {
        if let Value::Object(map) = settings {
            self.adapters.insert(protocol, map);
        }
        self
    }

    pub fn with_watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    pub fn with_protocols_override(mut self, raw: impl Into<String>) -> Self {
        self.protocols_override = Some(raw.into());
        self
    }

    /// Protocols named by an adapter section.
    pub fn requested_protocols(&self) -> BTreeSet<Protocol> {
        self.adapters.keys().copied().collect()
    }

    /// Parsed allow-list, or `None` when no override is set.
    ///
    /// Without an explicit `protocols_override` the process environment is
    /// consulted. A set but unrecognized list yields `Some` of an empty set.
    pub fn env_override(&self) -> Option<BTreeSet<Protocol>> {
        let raw = match &self.protocols_override {
            Some(raw) => raw.clone(),
            None => std::env::var(PROTOCOLS_ENV).ok()?,
        };
        if raw.trim().is_empty() {
            return None;
        }
        Some(parse_protocol_list(&raw))
    }

    /// Settings for one adapter (empty when absent).
    pub fn adapter_settings(&self, protocol: Protocol) -> AdapterSettings {
        self.adapters.get(&protocol).cloned().unwrap_or_default()
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

// =============================================================================
// Settings accessors: missing or malformed keys fall back to defaults
// =============================================================================

/// String setting or `default`.
pub fn str_field(settings: &AdapterSettings, key: &str, default: &str) -> String {
    settings
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or(default)
        .to_string()
}

/// Optional string setting.
pub fn opt_str_field(settings: &AdapterSettings, key: &str) -> Option<String> {
    settings.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

/// Port setting. Accepts numbers and numeric strings.
pub fn u16_field(settings: &AdapterSettings, key: &str) -> Option<u16> {
    match settings.get(key)? {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Duration setting. Accepts humantime strings (`"30s"`, `"1m"`) or a
/// number of seconds.
pub fn duration_field(settings: &AdapterSettings, key: &str) -> Result<Option<Duration>> {
    match settings.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(|secs| Some(Duration::from_secs_f64(secs)))
            .ok_or_else(|| Error::configuration(format!("{} must be a positive number of seconds", key))),
        Some(Value::String(s)) => {
            let parsed = humantime_serde::re::humantime::parse_duration(s.trim())
                .map_err(|e| Error::configuration(format!("invalid duration for {}: {}", key, e)))?;
            if parsed.is_zero() {
                return Err(Error::configuration(format!("{} must be a positive duration", key)));
            }
            Ok(Some(parsed))
        }
        Some(other) => Err(Error::configuration(format!(
            "{} must be a duration string, got {}",
            key, other
        ))),
    }
}
