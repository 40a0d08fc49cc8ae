//! Service and client registries.
//!
//! Both registries exist as plain structs (used directly by tests and by
//! embedders that manage their own lifecycle) and as process-wide instances.
//! The process-wide tables are written only during startup; `run_services`
//! freezes them before any adapter thread exists, and `reset_registries`
//! restores a clean slate for test isolation.

pub mod client;
pub mod function;
pub mod service;

pub use client::{ClientDefinition, ClientMetadata, ClientRegistry};
pub use function::{Kwargs, ServiceFunction};
pub use service::{
    validate_http_config, ParamSpec, ProtocolConfig, ServiceDefinition, ServiceMetadata,
    ServiceRegistry, HTTP_CONFIG_KEYS,
};

use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::Result;

static SERVICES: OnceLock<RwLock<ServiceRegistry>> = OnceLock::new();
static CLIENTS: OnceLock<RwLock<ClientRegistry>> = OnceLock::new();

/// Process-wide service registry.
pub fn services() -> &'static RwLock<ServiceRegistry> {
    SERVICES.get_or_init(|| RwLock::new(ServiceRegistry::new()))
}

/// Process-wide client registry.
pub fn clients() -> &'static RwLock<ClientRegistry> {
    CLIENTS.get_or_init(|| RwLock::new(ClientRegistry::new()))
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Register a service in the process-wide registry.
pub fn register_service(definition: ServiceDefinition) -> Result<Arc<ServiceMetadata>> {
    write(services()).register(definition)
}

/// Look up a service in the process-wide registry.
pub fn lookup_service(name: &str) -> Option<Arc<ServiceMetadata>> {
    read(services()).lookup(name)
}

/// Register a client function in the process-wide registry.
pub fn register_client(definition: ClientDefinition) -> Result<Arc<ClientMetadata>> {
    write(clients()).register(definition)
}

/// Freeze both process-wide registries.
pub fn freeze_registries() {
    write(services()).freeze();
    write(clients()).freeze();
}

/// Clear and unfreeze both process-wide registries.
pub fn reset_registries() {
    write(services()).reset();
    write(clients()).reset();
}

/// Run `f` with read access to both process-wide registries.
pub fn with_registries<R>(f: impl FnOnce(&ServiceRegistry, &ClientRegistry) -> R) -> R {
    let services = read(services());
    let clients = read(clients());
    f(&services, &clients)
}
