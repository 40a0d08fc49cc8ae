//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

use super::protocol::Protocol;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the polyport runtime.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid service, client or adapter configuration. Fatal for the
    /// registration that raised it.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Registration attempted after the registries were frozen.
    #[error("registry is frozen: {0}")]
    Frozen(String),

    /// A protocol's adapter could not be located or constructed.
    #[error("adapter for {protocol} unavailable: {reason}")]
    AdapterLoad { protocol: Protocol, reason: String },

    /// A single (adapter, function) registration failed.
    #[error("cannot register {service} on {protocol}: {reason}")]
    Registration {
        protocol: Protocol,
        service: String,
        reason: String,
    },

    /// An adapter failed to start.
    #[error("{protocol} adapter failed to start: {reason}")]
    AdapterStart { protocol: Protocol, reason: String },

    /// A wire payload could not be decoded.
    #[error("message decode error: {0}")]
    MessageDecode(String),

    /// The invoked user function failed.
    #[error("handler error: {0}")]
    Handler(String),

    /// The outbound client does not speak this protocol.
    #[error("protocol {0} is not supported by the client")]
    UnsupportedProtocol(Protocol),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// ZeroMQ transport errors.
    #[error("zeromq error: {0}")]
    Transport(#[from] zmq::Error),

    /// Outbound HTTP errors.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Only configuration-time validation errors cross the adapter boundary
    /// as raised errors; everything else is logged and absorbed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Configuration(_) | Error::Frozen(_))
    }

    /// Text placed in the `error` field of a wire reply.
    ///
    /// Handler failures carry the function's own message verbatim.
    pub fn reply_message(&self) -> String {
        match self {
            Error::Handler(msg) | Error::MessageDecode(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

// Convenience constructors
impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn frozen(msg: impl Into<String>) -> Self {
        Self::Frozen(msg.into())
    }

    pub fn adapter_load(protocol: Protocol, reason: impl Into<String>) -> Self {
        Self::AdapterLoad {
            protocol,
            reason: reason.into(),
        }
    }

    pub fn registration(protocol: Protocol, service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Registration {
            protocol,
            service: service.into(),
            reason: reason.into(),
        }
    }

    pub fn adapter_start(protocol: Protocol, reason: impl Into<String>) -> Self {
        Self::AdapterStart {
            protocol,
            reason: reason.into(),
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::MessageDecode(msg.into())
    }

    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::configuration("bad key").is_fatal());
        assert!(Error::frozen("late").is_fatal());
        assert!(!Error::handler("boom").is_fatal());
        assert!(!Error::adapter_load(Protocol::Mqtt, "missing").is_fatal());
    }

    #[test]
    fn test_reply_message_keeps_handler_text() {
        assert_eq!(Error::handler("division by zero").reply_message(), "division by zero");
        assert_eq!(
            Error::adapter_start(Protocol::Zeromq, "port in use").reply_message(),
            "zeromq adapter failed to start: port in use"
        );
    }
}
