//! polyport demo - serves a small calculator over ZeroMQ and the scheduler.
//!
//! Endpoints (default bind `tcp://*`):
//! - `add`: REQ_REP on 5555
//! - `subtract`: ROUTER_DEALER on 5556
//! - `uptime`: PUB_SUB on 5557, topic `stats`
//! - `square`: PUSH_PULL on 5558, results on 5559
//! - `heartbeat`: scheduled every 30s

use clap::Parser;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::time::Instant;

use polyport::{Config, Protocol, ServiceDefinition, ServiceFunction};

#[derive(Debug, Parser)]
#[command(name = "polyport-demo", version, about = "Serve demo functions over several protocols")]
struct Cli {
    /// JSON configuration file.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Comma-separated protocol allow-list.
    #[arg(long, env = "POLYPORT_PROTOCOLS")]
    protocols: Option<String>,

    /// Restart when the executable changes.
    #[arg(long, env = "POLYPORT_WATCH")]
    watch: bool,
}

#[derive(Debug, Deserialize)]
struct Operands {
    a: f64,
    b: f64,
}

#[derive(Debug, Deserialize)]
struct Single {
    x: f64,
}

fn register_demo_services() -> polyport::Result<()> {
    polyport::registry::register_service(
        ServiceDefinition::new("add", ServiceFunction::typed(|ops: Operands| Ok(ops.a + ops.b)))
            .description("Adds two numbers.")
            .param("a", "float", None)
            .param("b", "float", None)
            .returns("float")
            .protocol(Protocol::Zeromq, json!({ "pattern": "REQ_REP", "port": 5555 }))
            .defined_in(file!()),
    )?;

    polyport::registry::register_service(
        ServiceDefinition::new("subtract", ServiceFunction::typed(|ops: Operands| Ok(ops.a - ops.b)))
            .description("Subtracts b from a.")
            .param("a", "float", None)
            .param("b", "float", None)
            .returns("float")
            .protocol(Protocol::Zeromq, json!({ "pattern": "ROUTER_DEALER", "port": 5556 })),
    )?;

    let started = Instant::now();
    polyport::registry::register_service(
        ServiceDefinition::new(
            "uptime",
            ServiceFunction::sync(move |_| Ok(json!({ "uptime_secs": started.elapsed().as_secs() }))),
        )
        .description("Publishes process uptime.")
        .protocol(Protocol::Zeromq, json!({ "pattern": "PUB_SUB", "port": 5557, "topic": "stats" })),
    )?;

    polyport::registry::register_service(
        ServiceDefinition::new("square", ServiceFunction::typed(|s: Single| Ok(s.x * s.x)))
            .description("Squares x.")
            .param("x", "float", None)
            .protocol(Protocol::Zeromq, json!({ "pattern": "PUSH_PULL", "port": 5558 })),
    )?;

    polyport::registry::register_service(
        ServiceDefinition::new("heartbeat", ServiceFunction::sync(|_| Ok(json!("alive"))))
            .protocol(Protocol::Cron, json!({ "interval": "30s" })),
    )?;

    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_json_file(path)?,
        None => Config::from_env(),
    };
    if let Some(protocols) = cli.protocols {
        config = config.with_protocols_override(protocols);
    }
    if cli.watch {
        config = config.with_watch(true);
    }

    polyport::observability::init_tracing_with(&config.observability);
    register_demo_services()?;

    tracing::info!("polyport demo starting");
    polyport::run_services(config)?;
    Ok(())
}
