//! Turns the registries into running adapters.
//!
//! Every step is isolated per adapter (and per adapter/function pair): a
//! failure is logged and the remaining work proceeds. There is no rollback;
//! whatever started keeps serving until shutdown.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::signals::{block_until_shutdown, ShutdownReason, ShutdownTrigger};
use super::watcher::{restart_process, FileWatcher, WatcherHandle};
use crate::adapters::{
    resolve, AdapterCatalog, AdapterConfig, AdapterResolver, Availability, ProtocolAdapter,
    Registration,
};
use crate::client::ClientTable;
use crate::registry::{self, ClientRegistry, ServiceRegistry};
use crate::types::{Config, Protocol, Result};

/// Builds, configures, and starts adapters for a pair of registries.
#[derive(Debug)]
pub struct Orchestrator {
    config: Config,
    resolver: AdapterResolver,
}

impl Orchestrator {
    pub fn new(config: Config, catalog: AdapterCatalog) -> Self {
        Self {
            config,
            resolver: AdapterResolver::new(catalog),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Probe results of every protocol the orchestrator tried to load.
    pub fn capabilities(&self) -> &BTreeMap<Protocol, Availability> {
        self.resolver.capabilities()
    }

    /// The protocols that would go live for `services`.
    pub fn live_protocols(&self, services: &ServiceRegistry) -> BTreeSet<Protocol> {
        resolve(
            &self.config.requested_protocols(),
            self.config.env_override().as_ref(),
            &services.used_protocols(),
        )
    }

    /// Load, configure, register into, and start every live adapter.
    pub fn launch(&mut self, services: &ServiceRegistry, clients: &ClientRegistry) -> Result<RunningServices> {
        let live = self.live_protocols(services);
        info!(protocols = ?live, "resolved live protocols");

        let mut adapters: BTreeMap<Protocol, Box<dyn ProtocolAdapter>> = BTreeMap::new();
        for &protocol in &live {
            if let Some(adapter) = self.resolver.load_adapter(protocol) {
                adapters.insert(protocol, adapter);
            }
        }

        let client_table = ClientTable::from_config(&self.config, &live);
        adapters.retain(|&protocol, adapter| {
            let mut config = AdapterConfig::new(self.config.adapter_settings(protocol));
            if protocol == Protocol::Cron {
                config = config.with_clients(client_table.clone());
            }
            match adapter.setup(config) {
                Ok(()) => true,
                Err(e) => {
                    error!(protocol = %protocol, error = %e, "adapter setup failed, skipping");
                    false
                }
            }
        });

        for service in services.entries() {
            for (&protocol, adapter) in adapters.iter_mut() {
                if !service.is_enabled(protocol) {
                    continue;
                }
                // Services enabled everywhere by default have no schedule.
                if protocol == Protocol::Cron && !service.configs.contains_key(&Protocol::Cron) {
                    debug!(service = %service.name, "no cron config, not scheduled");
                    continue;
                }
                match adapter.register_function(Registration::Service(Arc::clone(&service))) {
                    Ok(()) => debug!(protocol = %protocol, service = %service.name, "registered"),
                    Err(e) => warn!(protocol = %protocol, service = %service.name, error = %e, "registration failed"),
                }
            }
        }

        if let Some(cron) = adapters.get_mut(&Protocol::Cron) {
            for client in clients.entries() {
                let name = client.name.clone();
                match cron.register_function(Registration::Client(client)) {
                    Ok(()) => debug!(protocol = %Protocol::Cron, service = %name, "registered client function"),
                    Err(e) => warn!(protocol = %Protocol::Cron, service = %name, error = %e, "client registration failed"),
                }
            }
        } else if !clients.is_empty() {
            warn!(clients = clients.len(), "cron is not live, client functions will not run");
        }

        for (&protocol, adapter) in adapters.iter_mut() {
            match adapter.start() {
                Ok(()) => info!(protocol = %protocol, "adapter started"),
                Err(e) => error!(protocol = %protocol, error = %e, "adapter failed to start"),
            }
        }

        let (trigger, shutdown) = ShutdownTrigger::new();
        Ok(RunningServices {
            adapters,
            trigger,
            shutdown: Some(shutdown),
            watcher: None,
            stopped: false,
        })
    }
}

/// Adapters started by [`Orchestrator::launch`].
pub struct RunningServices {
    adapters: BTreeMap<Protocol, Box<dyn ProtocolAdapter>>,
    trigger: ShutdownTrigger,
    shutdown: Option<tokio::sync::watch::Receiver<Option<ShutdownReason>>>,
    watcher: Option<WatcherHandle>,
    stopped: bool,
}

impl std::fmt::Debug for RunningServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningServices")
            .field("protocols", &self.protocols())
            .field("stopped", &self.stopped)
            .finish()
    }
}

impl RunningServices {
    /// Protocols with an instantiated adapter.
    pub fn protocols(&self) -> BTreeSet<Protocol> {
        self.adapters.keys().copied().collect()
    }

    pub fn adapter(&self, protocol: Protocol) -> Option<&dyn ProtocolAdapter> {
        self.adapters.get(&protocol).map(|a| a.as_ref())
    }

    /// Handle other threads can use to end [`RunningServices::wait_for_shutdown`].
    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.trigger.clone()
    }

    /// Start the hot-reload watcher; a detected change requests a restart.
    pub fn watch(&mut self, watcher: FileWatcher) -> Result<()> {
        let trigger = self.trigger.clone();
        let handle = watcher.spawn(move |_| trigger.request(ShutdownReason::Restart))?;
        self.watcher = Some(handle);
        Ok(())
    }

    /// Block until a termination signal or a shutdown request.
    pub fn wait_for_shutdown(&mut self) -> Result<ShutdownReason> {
        match self.shutdown.take() {
            Some(rx) => block_until_shutdown(rx),
            None => Ok(self.trigger.requested().unwrap_or(ShutdownReason::Requested)),
        }
    }

    /// Stop every adapter. Errors are logged; later calls do nothing.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Some(mut watcher) = self.watcher.take() {
            watcher.cancel();
        }
        for (protocol, adapter) in self.adapters.iter_mut() {
            if let Err(e) = adapter.stop() {
                warn!(protocol = %protocol, error = %e, "adapter failed to stop cleanly");
            }
        }
        info!("all adapters stopped");
    }
}

impl Drop for RunningServices {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Run the process-wide registries until shutdown.
///
/// Freezes the registries, launches every live adapter with the built-in
/// catalog, optionally watches source files, and blocks until SIGINT or
/// SIGTERM. On a watched change the process re-executes itself.
pub fn run_services(config: Config) -> Result<()> {
    run_services_with(config, AdapterCatalog::builtin())
}

/// [`run_services`] with a caller-supplied adapter catalog.
pub fn run_services_with(config: Config, catalog: AdapterCatalog) -> Result<()> {
    registry::freeze_registries();
    let watch = config.watch;
    let watch_interval = config.watch_interval;
    let mut orchestrator = Orchestrator::new(config, catalog);

    let (mut running, watched) = registry::with_registries(|services, clients| {
        orchestrator
            .launch(services, clients)
            .map(|running| (running, services.entries()))
    })?;

    if watch {
        running.watch(FileWatcher::for_services(&watched, watch_interval))?;
    }

    let reason = running.wait_for_shutdown()?;
    info!(reason = %reason, "shutting down");
    running.stop();

    if reason == ShutdownReason::Restart {
        return Err(restart_process());
    }
    Ok(())
}
