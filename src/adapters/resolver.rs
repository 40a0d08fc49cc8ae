//! Adapter resolution: the live protocol set and adapter availability.

use std::collections::{BTreeMap, BTreeSet};

use super::{AdapterCatalog, ProtocolAdapter};
use crate::types::{Error, Protocol};

/// Compute the live protocol set.
///
/// `Some(allowed)` is an explicit allow-list: the result is exactly its known
/// protocols, even if services reference others or none of the names were
/// recognized. `None` yields `requested ∪ used`.
pub fn resolve(
    requested: &BTreeSet<Protocol>,
    env_override: Option<&BTreeSet<Protocol>>,
    used: &BTreeSet<Protocol>,
) -> BTreeSet<Protocol> {
    match env_override {
        Some(allowed) => allowed.intersection(&Protocol::universe()).copied().collect(),
        None => requested.union(used).copied().collect(),
    }
}

/// Outcome of probing a protocol's adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable(String),
}

/// Capability table over an [`AdapterCatalog`].
///
/// Each probe constructs the adapter behind a `Result` boundary; failures
/// are logged, recorded, and never retried.
#[derive(Debug)]
pub struct AdapterResolver {
    catalog: AdapterCatalog,
    capabilities: BTreeMap<Protocol, Availability>,
}

impl AdapterResolver {
    pub fn new(catalog: AdapterCatalog) -> Self {
        Self {
            catalog,
            capabilities: BTreeMap::new(),
        }
    }

    /// Build the adapter for `protocol`, or `None` (with a warning) when it
    /// cannot be located or constructed.
    pub fn load_adapter(&mut self, protocol: Protocol) -> Option<Box<dyn ProtocolAdapter>> {
        if let Some(Availability::Unavailable(_)) = self.capabilities.get(&protocol) {
            return None;
        }

        let outcome = match self.catalog.factory(protocol) {
            None => Err(Error::adapter_load(protocol, "no adapter implementation registered")),
            Some(factory) => factory().map_err(|e| Error::adapter_load(protocol, e.to_string())),
        };

        match outcome {
            Ok(adapter) => {
                self.capabilities.insert(protocol, Availability::Available);
                Some(adapter)
            }
            Err(err) => {
                tracing::warn!(protocol = %protocol, "{}", err);
                self.capabilities
                    .insert(protocol, Availability::Unavailable(err.to_string()));
                None
            }
        }
    }

    /// Recorded probe result, if `protocol` was probed.
    pub fn availability(&self, protocol: Protocol) -> Option<&Availability> {
        self.capabilities.get(&protocol)
    }

    pub fn capabilities(&self) -> &BTreeMap<Protocol, Availability> {
        &self.capabilities
    }
}
