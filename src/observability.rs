//! Tracing setup.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::types::ObservabilityConfig;

/// Switches log output to JSON when set to `json`.
pub const LOG_FORMAT_ENV: &str = "POLYPORT_LOG_FORMAT";

static SUBSCRIBER: OnceLock<()> = OnceLock::new();

/// Install the global subscriber with default settings.
pub fn init_tracing() {
    init_tracing_with(&ObservabilityConfig::default());
}

/// Install the global subscriber once per process.
///
/// `RUST_LOG` wins over `config.log_level`. JSON output is selected by
/// `config.json_logs` or `POLYPORT_LOG_FORMAT=json`. Later calls are no-ops.
pub fn init_tracing_with(config: &ObservabilityConfig) {
    SUBSCRIBER.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.log_level))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let json = config.json_logs || json_requested();

        let installed = if json {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_current_span(false))
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact().with_target(false))
                .try_init()
        };

        if let Err(err) = installed {
            eprintln!("tracing subscriber already installed: {err}");
        }
    });
}

fn json_requested() -> bool {
    std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init_tracing_with(&ObservabilityConfig {
            log_level: "debug".to_string(),
            json_logs: false,
        });
        init_tracing();
    }
}
