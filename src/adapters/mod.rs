//! Protocol adapters.
//!
//! An adapter binds the registries to one wire protocol. The orchestrator
//! drives every adapter through the same four calls:
//!
//! ```text
//!   setup(config) ─▶ register_function(..)* ─▶ start() ─▶ stop()
//! ```
//!
//! Built-in adapters: [`zeromq::ZeroMqAdapter`] and [`cron::CronAdapter`].
//! HTTP, WebSocket, gRPC, MQTT, Redis, AMQP and GraphQL bindings are supplied
//! by the embedding application through [`AdapterCatalog::provide`]; a protocol
//! without a factory is simply absent from the live set.

pub mod cron;
pub mod resolver;
pub mod zeromq;

pub use resolver::{resolve, AdapterResolver, Availability};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::client::ClientTable;
use crate::registry::{ClientMetadata, ServiceMetadata};
use crate::types::{AdapterSettings, Protocol, Result};

/// Configuration handed to [`ProtocolAdapter::setup`].
#[derive(Debug, Clone, Default)]
pub struct AdapterConfig {
    /// The protocol's section of the runtime config (may be empty).
    pub settings: AdapterSettings,
    /// Outbound clients, one per live protocol. Only cron receives them.
    pub clients: Option<ClientTable>,
}

impl AdapterConfig {
    pub fn new(settings: AdapterSettings) -> Self {
        Self {
            settings,
            clients: None,
        }
    }

    pub fn with_clients(mut self, clients: ClientTable) -> Self {
        self.clients = Some(clients);
        self
    }
}

/// A function handed to an adapter.
#[derive(Debug, Clone)]
pub enum Registration {
    Service(Arc<ServiceMetadata>),
    Client(Arc<ClientMetadata>),
}

impl Registration {
    pub fn name(&self) -> &str {
        match self {
            Registration::Service(svc) => &svc.name,
            Registration::Client(client) => &client.name,
        }
    }
}

/// Lifecycle contract every protocol adapter implements.
///
/// All calls must tolerate missing config keys by falling back to defaults.
/// `stop` must be idempotent.
pub trait ProtocolAdapter: Send {
    fn protocol(&self) -> Protocol;

    fn setup(&mut self, config: AdapterConfig) -> Result<()>;

    fn register_function(&mut self, registration: Registration) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// Ports bound per function name, for adapters that listen on sockets.
    fn bound_ports(&self) -> BTreeMap<String, u16> {
        BTreeMap::new()
    }
}

/// Constructor for one adapter.
pub type AdapterFactory = Arc<dyn Fn() -> Result<Box<dyn ProtocolAdapter>> + Send + Sync>;

/// Maps each protocol to its adapter constructor.
#[derive(Clone, Default)]
pub struct AdapterCatalog {
    factories: BTreeMap<Protocol, AdapterFactory>,
}

impl fmt::Debug for AdapterCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterCatalog")
            .field("protocols", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AdapterCatalog {
    /// A catalog with no adapters.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The adapters shipped with this crate.
    pub fn builtin() -> Self {
        Self::empty()
            .provide(Protocol::Zeromq, || {
                Ok(Box::new(zeromq::ZeroMqAdapter::new()) as Box<dyn ProtocolAdapter>)
            })
            .provide(Protocol::Cron, || {
                Ok(Box::new(cron::CronAdapter::new()) as Box<dyn ProtocolAdapter>)
            })
    }

    /// Add or replace the factory for `protocol`.
    pub fn provide<F>(mut self, protocol: Protocol, factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn ProtocolAdapter>> + Send + Sync + 'static,
    {
        self.factories.insert(protocol, Arc::new(factory));
        self
    }

    pub fn factory(&self, protocol: Protocol) -> Option<AdapterFactory> {
        self.factories.get(&protocol).cloned()
    }

    pub fn provides(&self, protocol: Protocol) -> bool {
        self.factories.contains_key(&protocol)
    }
}
