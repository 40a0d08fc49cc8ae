//! ZeroMQ protocol adapter.
//!
//! Serves each registered function on its own endpoint using one of four
//! messaging patterns:
//!
//! | pattern         | sockets                  | exchange                                  |
//! |-----------------|--------------------------|-------------------------------------------|
//! | `REQ_REP`       | REP                      | JSON request, one JSON reply              |
//! | `PUB_SUB`       | PUB                      | `[topic, json]` every `publish_interval`  |
//! | `PUSH_PULL`     | PULL in, PUSH out        | `{data, response_id}` in, result out      |
//! | `ROUTER_DEALER` | ROUTER                   | `[identity, delimiter, json]` both ways   |
//!
//! Sockets are bound in [`ZeroMqAdapter::start`] on the caller's thread, so
//! bind errors surface there; each function's loop then runs on a dedicated
//! thread that owns its sockets. [`ZeroMqAdapter::stop`] clears the running
//! flag and waits up to two seconds per thread.
//!
//! A thread still inside a handler when that wait expires is abandoned, not
//! killed: `stop` returns, and the thread closes its sockets and reports
//! [`EndpointState::Closed`] as soon as the handler returns. Until then its
//! port stays bound.

pub mod pattern;
pub mod reply;
mod worker;

pub use pattern::{AdapterDefaults, EndpointConfig, Pattern};
pub use worker::EndpointState;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::{AdapterConfig, ProtocolAdapter, Registration};
use crate::registry::ServiceMetadata;
use crate::types::{AdapterSettings, Error, Protocol, Result};
use worker::{get_state, set_state, SharedState, Worker};

/// Upper bound on waiting for one serving thread during `stop`.
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

struct WorkerHandle {
    thread: JoinHandle<()>,
    done: Receiver<()>,
}

struct Endpoint {
    service: Arc<ServiceMetadata>,
    config: EndpointConfig,
    state: SharedState,
    port: Option<u16>,
    response_port: Option<u16>,
    worker: Option<WorkerHandle>,
}

impl Endpoint {
    fn launch(&mut self, context: &zmq::Context, running: &Arc<AtomicBool>, publish_interval: Duration) -> Result<()> {
        let binding = worker::bind(context, &self.config)?;
        self.port = Some(binding.port);
        self.response_port = binding.response_port;
        set_state(&self.state, EndpointState::Bound);

        let (done_tx, done_rx) = mpsc::channel();
        let serving = Worker {
            service: Arc::clone(&self.service),
            endpoint: self.config.clone(),
            running: Arc::clone(running),
            state: Arc::clone(&self.state),
            publish_interval,
        };
        let thread = serving.spawn(binding.sockets, done_tx)?;
        self.worker = Some(WorkerHandle { thread, done: done_rx });
        Ok(())
    }
}

/// Adapter exposing registered services over ZeroMQ sockets.
pub struct ZeroMqAdapter {
    context: Option<zmq::Context>,
    settings: AdapterSettings,
    defaults: AdapterDefaults,
    endpoints: BTreeMap<String, Endpoint>,
    // Replaced on every start so threads abandoned by a timed-out stop never
    // observe a later start.
    running: Arc<AtomicBool>,
}

impl Default for ZeroMqAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ZeroMqAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZeroMqAdapter")
            .field("defaults", &self.defaults)
            .field("functions", &self.endpoints.keys().collect::<Vec<_>>())
            .field("running", &self.is_running())
            .finish()
    }
}

impl ZeroMqAdapter {
    pub fn new() -> Self {
        Self {
            context: None,
            settings: AdapterSettings::new(),
            defaults: AdapterDefaults::default(),
            endpoints: BTreeMap::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Settings passed to the last `setup`.
    pub fn settings(&self) -> &AdapterSettings {
        &self.settings
    }

    /// Names of registered functions.
    pub fn functions(&self) -> Vec<String> {
        self.endpoints.keys().cloned().collect()
    }

    /// Port the function's primary socket is bound to, once started.
    pub fn bound_port(&self, name: &str) -> Option<u16> {
        self.endpoints.get(name).and_then(|e| e.port)
    }

    /// Port of a push/pull function's result socket, once started.
    pub fn response_port(&self, name: &str) -> Option<u16> {
        self.endpoints.get(name).and_then(|e| e.response_port)
    }

    pub fn endpoint_state(&self, name: &str) -> Option<EndpointState> {
        self.endpoints.get(name).map(|e| get_state(&e.state))
    }

    pub fn pattern(&self, name: &str) -> Option<Pattern> {
        self.endpoints.get(name).map(|e| e.config.pattern)
    }

    fn context(&mut self) -> Result<zmq::Context> {
        if let Some(context) = &self.context {
            return Ok(context.clone());
        }
        let context = new_context(self.defaults.io_threads)?;
        self.context = Some(context.clone());
        Ok(context)
    }
}

fn new_context(io_threads: Option<i32>) -> Result<zmq::Context> {
    let context = zmq::Context::new();
    if let Some(threads) = io_threads {
        context.set_io_threads(threads)?;
    }
    Ok(context)
}

impl ProtocolAdapter for ZeroMqAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Zeromq
    }

    fn setup(&mut self, config: AdapterConfig) -> Result<()> {
        self.defaults = AdapterDefaults::from_settings(&config.settings)?;
        self.settings = config.settings;
        if !self.is_running() {
            self.context = Some(new_context(self.defaults.io_threads)?);
        }
        debug!(bind_address = %self.defaults.bind_address, "zeromq adapter configured");
        Ok(())
    }

    fn register_function(&mut self, registration: Registration) -> Result<()> {
        let service = match registration {
            Registration::Service(service) => service,
            Registration::Client(client) => {
                return Err(Error::registration(
                    Protocol::Zeromq,
                    client.name.clone(),
                    "client functions are driven by the cron adapter",
                ));
            }
        };
        if self.is_running() {
            return Err(Error::registration(Protocol::Zeromq, service.name.clone(), "adapter already started"));
        }

        let config = EndpointConfig::resolve(&service.name, &service.config(Protocol::Zeromq), &self.defaults)
            .map_err(|e| Error::registration(Protocol::Zeromq, service.name.clone(), e.to_string()))?;
        debug!(service = %service.name, pattern = %config.pattern, "registered zeromq function");
        self.endpoints.insert(
            service.name.clone(),
            Endpoint {
                service,
                config,
                state: Arc::new(Mutex::new(EndpointState::Configured)),
                port: None,
                response_port: None,
                worker: None,
            },
        );
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        let context = self.context()?;
        let running = Arc::new(AtomicBool::new(true));
        self.running = Arc::clone(&running);

        let publish_interval = self.defaults.publish_interval;
        let mut failures = Vec::new();
        for (name, endpoint) in self.endpoints.iter_mut() {
            match endpoint.launch(&context, &running, publish_interval) {
                Ok(()) => info!(
                    service = %name,
                    pattern = %endpoint.config.pattern,
                    port = endpoint.port.unwrap_or_default(),
                    "zeromq endpoint bound"
                ),
                Err(e) => {
                    error!(service = %name, endpoint = %endpoint.config.bind_endpoint(), error = %e, "failed to start zeromq endpoint");
                    failures.push(format!("{}: {}", name, e));
                }
            }
        }

        info!(functions = self.endpoints.len() - failures.len(), "zeromq adapter started");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::adapter_start(Protocol::Zeromq, failures.join("; ")))
        }
    }

    fn stop(&mut self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        for (name, endpoint) in self.endpoints.iter_mut() {
            let Some(handle) = endpoint.worker.take() else {
                continue;
            };
            match handle.done.recv_timeout(JOIN_TIMEOUT) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if handle.thread.join().is_err() {
                        warn!(service = %name, "zeromq thread panicked");
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(service = %name, "zeromq thread did not exit in time, abandoning it");
                }
            }
        }
        info!("zeromq adapter stopped");
        Ok(())
    }

    fn bound_ports(&self) -> BTreeMap<String, u16> {
        self.endpoints
            .iter()
            .filter_map(|(name, endpoint)| endpoint.port.map(|port| (name.clone(), port)))
            .collect()
    }
}

impl Drop for ZeroMqAdapter {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
