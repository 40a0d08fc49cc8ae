//! Service registry - function metadata keyed by service name.
//!
//! Features:
//!   - Builder-style service definitions
//!   - Per-protocol config merging and validation
//!   - Last-writer-wins registration with an explicit freeze

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use super::client::ClientMetadata;
use super::function::ServiceFunction;
use crate::types::{Error, Protocol, Result};

/// Keys accepted in an `http` protocol config.
pub const HTTP_CONFIG_KEYS: [&str; 3] = ["path", "method", "middleware"];

/// Protocol-specific configuration object.
pub type ProtocolConfig = Map<String, Value>;

// =============================================================================
// Parameter spec
// =============================================================================

/// One declared parameter. Documentation only; never used for coercion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSpec {
    pub name: String,
    pub type_hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

// =============================================================================
// Service metadata
// =============================================================================

/// ServiceMetadata describes one registered function.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceMetadata {
    pub name: String,
    pub description: String,
    #[serde(skip)]
    pub function: ServiceFunction,
    pub parameters: Vec<ParamSpec>,
    pub return_type: Option<String>,
    pub protocols: BTreeSet<Protocol>,
    pub configs: BTreeMap<Protocol, ProtocolConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<Arc<ClientMetadata>>,
}

impl ServiceMetadata {
    /// Config for one protocol (empty when none was given).
    pub fn config(&self, protocol: Protocol) -> ProtocolConfig {
        self.configs.get(&protocol).cloned().unwrap_or_default()
    }

    pub fn is_enabled(&self, protocol: Protocol) -> bool {
        self.protocols.contains(&protocol)
    }
}

// =============================================================================
// Service definition (builder)
// =============================================================================

/// Explicit builder replacing annotation side effects.
#[derive(Debug, Clone)]
pub struct ServiceDefinition {
    name: String,
    description: String,
    function: ServiceFunction,
    parameters: Vec<ParamSpec>,
    return_type: Option<String>,
    direct: BTreeMap<Protocol, ProtocolConfig>,
    attached: BTreeMap<Protocol, ProtocolConfig>,
    source_file: Option<PathBuf>,
    client: Option<Arc<ClientMetadata>>,
}

impl ServiceDefinition {
    pub fn new(name: impl Into<String>, function: ServiceFunction) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            function,
            parameters: Vec::new(),
            return_type: None,
            direct: BTreeMap::new(),
            attached: BTreeMap::new(),
            source_file: None,
            client: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declare a parameter, in call order.
    pub fn param(mut self, name: impl Into<String>, type_hint: impl Into<String>, default: Option<Value>) -> Self {
        self.parameters.push(ParamSpec {
            name: name.into(),
            type_hint: Some(type_hint.into()),
            default,
        });
        self
    }

    pub fn returns(mut self, type_hint: impl Into<String>) -> Self {
        self.return_type = Some(type_hint.into());
        self
    }

    /// Config given directly at definition time. Wins over attached config.
    /// Non-object values are treated as an empty config.
    pub fn protocol(mut self, protocol: Protocol, config: Value) -> Self {
        self.direct.insert(protocol, into_map(config));
        self
    }

    /// Single-protocol annotation: the protocol's default config with
    /// `overrides` layered on top.
    pub fn attach(mut self, protocol: Protocol, overrides: Value) -> Self {
        let mut config = protocol.default_config(&self.name);
        config.extend(into_map(overrides));
        self.attached.insert(protocol, config);
        self
    }

    /// Source file defining this service; watched for hot reload.
    pub fn defined_in(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_file = Some(path.into());
        self
    }

    /// Mark the function as also being an outbound caller.
    pub fn client(mut self, client: Arc<ClientMetadata>) -> Self {
        self.client = Some(client);
        self
    }

    /// Validate and merge into metadata.
    pub fn build(self) -> Result<ServiceMetadata> {
        if self.name.trim().is_empty() {
            return Err(Error::configuration("service name cannot be empty"));
        }

        let mut configs = self.attached;
        for (protocol, config) in self.direct {
            configs.insert(protocol, config);
        }

        if let Some(http) = configs.get(&Protocol::Http) {
            validate_http_config(http)?;
        }

        let protocols: BTreeSet<Protocol> = if configs.is_empty() {
            Protocol::universe()
        } else {
            configs.keys().copied().collect()
        };

        Ok(ServiceMetadata {
            name: self.name,
            description: self.description,
            function: self.function,
            parameters: self.parameters,
            return_type: self.return_type,
            protocols,
            configs,
            source_file: self.source_file,
            client: self.client,
        })
    }
}

fn into_map(value: Value) -> ProtocolConfig {
    match value {
        Value::Object(map) => map,
        _ => ProtocolConfig::new(),
    }
}

/// Reject unknown keys in an `http` config.
pub fn validate_http_config(config: &ProtocolConfig) -> Result<()> {
    let mut invalid: Vec<&str> = config
        .keys()
        .map(String::as_str)
        .filter(|key| !HTTP_CONFIG_KEYS.contains(key))
        .collect();
    if invalid.is_empty() {
        return Ok(());
    }
    invalid.sort_unstable();
    Err(Error::configuration(format!(
        "invalid http configuration keys: {}. Valid keys are: {}",
        invalid.join(", "),
        HTTP_CONFIG_KEYS.join(", ")
    )))
}

// =============================================================================
// Service Registry
// =============================================================================

/// ServiceRegistry maps service names to their metadata.
///
/// Written during single-threaded startup, then frozen and shared read-only
/// with the adapters.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, Arc<ServiceMetadata>>,
    frozen: bool,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and store a definition. Re-registering a name replaces the
    /// previous entry.
    pub fn register(&mut self, definition: ServiceDefinition) -> Result<Arc<ServiceMetadata>> {
        if self.frozen {
            return Err(Error::frozen(format!(
                "cannot register service {} after startup",
                definition.name
            )));
        }
        let metadata = Arc::new(definition.build()?);
        if self
            .services
            .insert(metadata.name.clone(), Arc::clone(&metadata))
            .is_some()
        {
            tracing::debug!(service = %metadata.name, "service re-registered, previous entry replaced");
        }
        Ok(metadata)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<ServiceMetadata>> {
        self.services.get(name).cloned()
    }

    /// Union of enabled protocols across all services.
    pub fn used_protocols(&self) -> BTreeSet<Protocol> {
        self.services
            .values()
            .flat_map(|svc| svc.protocols.iter().copied())
            .collect()
    }

    /// All entries, sorted by name.
    pub fn entries(&self) -> Vec<Arc<ServiceMetadata>> {
        self.services.values().cloned().collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Drop every entry and unfreeze.
    pub fn reset(&mut self) {
        self.services.clear();
        self.frozen = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn constant(value: i64) -> ServiceFunction {
        ServiceFunction::sync(move |_| Ok(json!(value)))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ServiceRegistry::new();
        let def = ServiceDefinition::new("add", constant(1))
            .description("Add two numbers")
            .param("a", "int", None)
            .param("b", "int", Some(json!(0)))
            .returns("int")
            .protocol(Protocol::Zeromq, json!({ "pattern": "REQ_REP" }));
        registry.register(def).unwrap();

        let svc = registry.lookup("add").unwrap();
        assert_eq!(svc.description, "Add two numbers");
        assert_eq!(svc.parameters.len(), 2);
        assert!(svc.parameters[0].is_required());
        assert!(!svc.parameters[1].is_required());
        assert_eq!(svc.return_type.as_deref(), Some("int"));
        assert_eq!(svc.protocols.iter().copied().collect::<Vec<_>>(), vec![Protocol::Zeromq]);
        assert!(registry.lookup("missing").is_none());
    }

    #[test]
    fn test_last_writer_wins() {
        let mut registry = ServiceRegistry::new();
        registry
            .register(ServiceDefinition::new("calc", constant(1)).protocol(Protocol::Http, json!({})))
            .unwrap();
        registry
            .register(ServiceDefinition::new("calc", constant(2)).protocol(Protocol::Zeromq, json!({})))
            .unwrap();

        assert_eq!(registry.len(), 1);
        let svc = registry.lookup("calc").unwrap();
        assert_eq!(svc.function.invoke(Map::new()).unwrap(), json!(2));
        assert!(!svc.is_enabled(Protocol::Http));
        assert!(svc.is_enabled(Protocol::Zeromq));
    }

    #[test]
    fn test_invalid_http_keys_rejected() {
        let mut registry = ServiceRegistry::new();
        let def = ServiceDefinition::new("bad", constant(0))
            .protocol(Protocol::Http, json!({ "path": "/x", "verb": "PUT", "auth": true }));
        let err = registry.register(def).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("auth, verb"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_attached_config_merged_under_direct() {
        let def = ServiceDefinition::new("get_product", constant(0))
            .attach(Protocol::Http, json!({ "method": "GET" }))
            .attach(Protocol::Mqtt, json!({}))
            .protocol(Protocol::Http, json!({ "path": "/api/products", "method": "POST" }));
        let svc = def.build().unwrap();

        assert_eq!(svc.config(Protocol::Http)["method"], "POST");
        assert_eq!(svc.config(Protocol::Mqtt)["topic"], "get_product");
        assert_eq!(
            svc.protocols.iter().copied().collect::<Vec<_>>(),
            vec![Protocol::Http, Protocol::Mqtt]
        );
    }

    #[test]
    fn test_bare_service_enables_every_protocol() {
        let svc = ServiceDefinition::new("ping", constant(0)).build().unwrap();
        assert_eq!(svc.protocols, Protocol::universe());
    }

    #[test]
    fn test_used_protocols_is_union() {
        let mut registry = ServiceRegistry::new();
        registry
            .register(ServiceDefinition::new("a", constant(0)).protocol(Protocol::Http, json!({})))
            .unwrap();
        registry
            .register(
                ServiceDefinition::new("b", constant(0))
                    .protocol(Protocol::Zeromq, json!({}))
                    .protocol(Protocol::Cron, json!({ "interval": "1m" })),
            )
            .unwrap();
        let used: Vec<_> = registry.used_protocols().into_iter().collect();
        assert_eq!(used, vec![Protocol::Http, Protocol::Zeromq, Protocol::Cron]);
    }

    #[test]
    fn test_frozen_registry_rejects_and_reset_clears() {
        let mut registry = ServiceRegistry::new();
        registry.register(ServiceDefinition::new("a", constant(0))).unwrap();
        registry.freeze();
        let err = registry.register(ServiceDefinition::new("b", constant(0))).unwrap_err();
        assert!(matches!(err, Error::Frozen(_)));

        registry.reset();
        assert!(!registry.is_frozen());
        assert!(registry.is_empty());
        registry.register(ServiceDefinition::new("b", constant(0))).unwrap();
    }
}
