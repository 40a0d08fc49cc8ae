//! The fixed protocol universe.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::errors::Error;

/// A wire protocol a service can be exposed on.
///
/// Declaration order is the canonical order: `Ord` follows it, so every
/// `BTreeSet<Protocol>` iterates in the same sequence as [`Protocol::ALL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Websocket,
    Grpc,
    Mqtt,
    Zeromq,
    Redis,
    Amqp,
    Graphql,
    Cron,
}

impl Protocol {
    /// Every known protocol, in canonical order.
    pub const ALL: [Protocol; 9] = [
        Protocol::Http,
        Protocol::Websocket,
        Protocol::Grpc,
        Protocol::Mqtt,
        Protocol::Zeromq,
        Protocol::Redis,
        Protocol::Amqp,
        Protocol::Graphql,
        Protocol::Cron,
    ];

    /// Lower-case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Websocket => "websocket",
            Protocol::Grpc => "grpc",
            Protocol::Mqtt => "mqtt",
            Protocol::Zeromq => "zeromq",
            Protocol::Redis => "redis",
            Protocol::Amqp => "amqp",
            Protocol::Graphql => "graphql",
            Protocol::Cron => "cron",
        }
    }

    /// The full universe as a set.
    pub fn universe() -> BTreeSet<Protocol> {
        Self::ALL.into_iter().collect()
    }

    /// Default configuration attached by a single-protocol annotation.
    ///
    /// `{name}` placeholders are replaced with the service name.
    pub fn default_config(&self, service_name: &str) -> Map<String, Value> {
        let value = match self {
            Protocol::Http => json!({ "path": format!("/api/{}", service_name), "method": "GET" }),
            Protocol::Websocket => json!({ "event": service_name }),
            Protocol::Grpc => json!({ "service_name": null, "method": null, "streaming": false }),
            Protocol::Mqtt => json!({ "topic": service_name, "qos": 0 }),
            Protocol::Zeromq => json!({ "socket_type": "REP", "identity": null }),
            Protocol::Redis => json!({ "channel": null, "pattern": null, "command": null }),
            Protocol::Amqp => json!({
                "queue": null,
                "exchange": "",
                "routing_key": null,
                "exchange_type": "direct",
            }),
            Protocol::Graphql => json!({ "field_name": null, "is_mutation": false, "description": null }),
            Protocol::Cron => json!({ "interval": null, "at": null, "cron_expression": null }),
        };
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| Error::configuration(format!("unknown protocol: {}", wanted)))
    }
}

/// Parse a comma-separated allow-list, keeping only known protocol names.
pub fn parse_protocol_list(raw: &str) -> BTreeSet<Protocol> {
    raw.split(',')
        .filter(|part| !part.trim().is_empty())
        .filter_map(|part| part.parse().ok())
        .collect()
}
