//! Messaging patterns and per-function endpoint settings.

use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::registry::ProtocolConfig;
use crate::types::{duration_field, opt_str_field, str_field, u16_field, AdapterSettings, Error, Result};

/// Bind address used when neither the function nor the adapter names one.
pub const DEFAULT_BIND_ADDRESS: &str = "tcp://*";

/// Default period of the publish/subscribe loop.
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_secs(1);

/// ZeroMQ messaging pattern served for one function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// REP socket, one JSON reply per JSON request.
    RequestReply,
    /// PUB socket, periodic publication of the function's result.
    PublishSubscribe,
    /// PULL socket inbound, PUSH socket for results.
    PushPull,
    /// ROUTER socket, `[identity, delimiter, payload]` envelopes.
    RouterDealer,
}

impl Pattern {
    /// Accepts pattern names (`REQ_REP`, `pub/sub`, ...) and the server-side
    /// socket names (`REP`, `PUB`, `PULL`, `ROUTER`).
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_ascii_uppercase().replace(['/', '-'], "_");
        match normalized.as_str() {
            "REQ_REP" | "REQ" | "REP" => Ok(Pattern::RequestReply),
            "PUB_SUB" | "PUB" => Ok(Pattern::PublishSubscribe),
            "PUSH_PULL" | "PULL" => Ok(Pattern::PushPull),
            "ROUTER_DEALER" | "ROUTER" => Ok(Pattern::RouterDealer),
            _ => Err(Error::configuration(format!("unsupported zeromq pattern: {}", raw))),
        }
    }

    /// Socket type of the primary (inbound or publishing) socket.
    pub fn socket_type(&self) -> zmq::SocketType {
        match self {
            Pattern::RequestReply => zmq::REP,
            Pattern::PublishSubscribe => zmq::PUB,
            Pattern::PushPull => zmq::PULL,
            Pattern::RouterDealer => zmq::ROUTER,
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Pattern::RequestReply => "REQ_REP",
            Pattern::PublishSubscribe => "PUB_SUB",
            Pattern::PushPull => "PUSH_PULL",
            Pattern::RouterDealer => "ROUTER_DEALER",
        })
    }
}

/// Adapter-wide defaults read in `setup`.
#[derive(Debug, Clone)]
pub struct AdapterDefaults {
    pub bind_address: String,
    pub response_port: Option<u16>,
    pub publish_interval: Duration,
    pub io_threads: Option<i32>,
}

impl Default for AdapterDefaults {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            response_port: None,
            publish_interval: DEFAULT_PUBLISH_INTERVAL,
            io_threads: None,
        }
    }
}

impl AdapterDefaults {
    pub fn from_settings(settings: &AdapterSettings) -> Result<Self> {
        let io_threads = settings
            .get("io_threads")
            .and_then(Value::as_i64)
            .and_then(|n| i32::try_from(n).ok())
            .filter(|n| *n > 0);
        Ok(Self {
            bind_address: str_field(settings, "bind_address", DEFAULT_BIND_ADDRESS),
            response_port: u16_field(settings, "response_port"),
            publish_interval: duration_field(settings, "publish_interval")?
                .unwrap_or(DEFAULT_PUBLISH_INTERVAL),
            io_threads,
        })
    }
}

/// Where and how one function is served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub pattern: Pattern,
    /// 0 asks the kernel for an ephemeral port.
    pub port: u16,
    pub bind_address: String,
    pub topic: String,
    /// Outbound port for push/pull results; `None` means `port + 1`.
    pub response_port: Option<u16>,
}

impl EndpointConfig {
    /// Resolve a function's `zeromq` config against the adapter defaults.
    pub fn resolve(service_name: &str, config: &ProtocolConfig, defaults: &AdapterDefaults) -> Result<Self> {
        let pattern = match opt_str_field(config, "pattern").or_else(|| opt_str_field(config, "socket_type")) {
            Some(raw) => Pattern::parse(&raw)?,
            None => Pattern::RequestReply,
        };
        Ok(Self {
            pattern,
            port: u16_field(config, "port").unwrap_or(0),
            bind_address: str_field(config, "bind_address", &defaults.bind_address),
            topic: str_field(config, "topic", service_name),
            response_port: u16_field(config, "response_port").or(defaults.response_port),
        })
    }

    /// Endpoint string for the primary socket.
    pub fn bind_endpoint(&self) -> String {
        with_port(&self.bind_address, self.port)
    }

    /// Endpoint string for the push/pull result socket, given the port the
    /// pull socket actually bound.
    pub fn response_endpoint(&self, bound_port: u16) -> String {
        let port = self
            .response_port
            .unwrap_or_else(|| bound_port.saturating_add(1));
        with_port(&self.bind_address, port)
    }
}

fn with_port(address: &str, port: u16) -> String {
    if port == 0 {
        format!("{}:*", address)
    } else {
        format!("{}:{}", address, port)
    }
}

/// Port of a bound socket, read back from its last endpoint.
pub fn bound_port(socket: &zmq::Socket) -> Result<u16> {
    let endpoint = socket
        .get_last_endpoint()?
        .map_err(|_| Error::decode("last endpoint is not valid UTF-8"))?;
    endpoint
        .rsplit(':')
        .next()
        .and_then(|port| port.parse().ok())
        .ok_or_else(|| Error::decode(format!("cannot read port from endpoint {}", endpoint)))
}
