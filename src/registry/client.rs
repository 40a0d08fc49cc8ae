//! Client registry - functions that call another service.
//!
//! Client functions are driven by the cron adapter: on each tick the function
//! produces the arguments and the outbound client performs the call.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::function::ServiceFunction;
use super::service::ProtocolConfig;
use crate::types::{Error, Protocol, Result};

/// ClientMetadata describes one outbound caller.
#[derive(Debug, Clone, Serialize)]
pub struct ClientMetadata {
    pub name: String,
    pub target_service: String,
    #[serde(skip)]
    pub function: ServiceFunction,
    pub protocol: Protocol,
    pub config: ProtocolConfig,
}

/// Builder for a client function. Exactly one protocol must be given.
#[derive(Debug, Clone)]
pub struct ClientDefinition {
    name: String,
    function: ServiceFunction,
    protocols: Vec<(Protocol, ProtocolConfig)>,
}

impl ClientDefinition {
    pub fn new(name: impl Into<String>, function: ServiceFunction) -> Self {
        Self {
            name: name.into(),
            function,
            protocols: Vec::new(),
        }
    }

    /// Protocol used for the outbound call. A `service` key in `config`
    /// names the target service.
    pub fn protocol(mut self, protocol: Protocol, config: Value) -> Self {
        let config = match config {
            Value::Object(map) => map,
            _ => ProtocolConfig::new(),
        };
        self.protocols.push((protocol, config));
        self
    }

    pub fn build(self) -> Result<ClientMetadata> {
        if self.name.trim().is_empty() {
            return Err(Error::configuration("client name cannot be empty"));
        }
        let mut protocols = self.protocols;
        if protocols.len() != 1 {
            return Err(Error::configuration(format!(
                "client {} must name exactly one protocol, got {}",
                self.name,
                protocols.len()
            )));
        }
        let (protocol, mut config) = protocols.remove(0);
        let target_service = match config.remove("service") {
            Some(Value::String(target)) if !target.is_empty() => target,
            _ => self.name.clone(),
        };
        Ok(ClientMetadata {
            name: self.name,
            target_service,
            function: self.function,
            protocol,
            config,
        })
    }
}

/// ClientRegistry maps client function names to their metadata.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: BTreeMap<String, Arc<ClientMetadata>>,
    frozen: bool,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and store a client. Re-registering a name replaces the entry.
    pub fn register(&mut self, definition: ClientDefinition) -> Result<Arc<ClientMetadata>> {
        if self.frozen {
            return Err(Error::frozen(format!(
                "cannot register client {} after startup",
                definition.name
            )));
        }
        let metadata = Arc::new(definition.build()?);
        self.clients.insert(metadata.name.clone(), Arc::clone(&metadata));
        Ok(metadata)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<ClientMetadata>> {
        self.clients.get(name).cloned()
    }

    pub fn entries(&self) -> Vec<Arc<ClientMetadata>> {
        self.clients.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn reset(&mut self) {
        self.clients.clear();
        self.frozen = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop() -> ServiceFunction {
        ServiceFunction::sync(|_| Ok(json!({})))
    }

    #[test]
    fn test_target_defaults_to_name() {
        let client = ClientDefinition::new("get_product", noop())
            .protocol(Protocol::Http, json!({ "path": "/api/products/1" }))
            .build()
            .unwrap();
        assert_eq!(client.target_service, "get_product");
        assert_eq!(client.protocol, Protocol::Http);
        assert_eq!(client.config["path"], "/api/products/1");
    }

    #[test]
    fn test_service_key_becomes_target() {
        let client = ClientDefinition::new("refresh", noop())
            .protocol(Protocol::Http, json!({ "service": "products", "method": "GET" }))
            .build()
            .unwrap();
        assert_eq!(client.target_service, "products");
        assert!(!client.config.contains_key("service"));
    }

    #[test]
    fn test_exactly_one_protocol_required() {
        let none = ClientDefinition::new("c", noop()).build().unwrap_err();
        assert!(matches!(none, Error::Configuration(_)));

        let two = ClientDefinition::new("c", noop())
            .protocol(Protocol::Http, json!({}))
            .protocol(Protocol::Grpc, json!({}))
            .build()
            .unwrap_err();
        assert!(two.to_string().contains("exactly one protocol"));
    }

    #[test]
    fn test_registry_overwrites_and_freezes() {
        let mut registry = ClientRegistry::new();
        registry
            .register(ClientDefinition::new("c", noop()).protocol(Protocol::Http, json!({})))
            .unwrap();
        registry
            .register(ClientDefinition::new("c", noop()).protocol(Protocol::Grpc, json!({})))
            .unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("c").unwrap().protocol, Protocol::Grpc);

        registry.freeze();
        assert!(registry
            .register(ClientDefinition::new("d", noop()).protocol(Protocol::Http, json!({})))
            .is_err());
    }
}
