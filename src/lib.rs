//! # polyport - one function, many protocols
//!
//! Register plain functions once and serve them over every protocol they
//! declare:
//! - Service and client registries with per-protocol configuration
//! - Adapter resolution honouring a `POLYPORT_PROTOCOLS` allow-list
//! - A ZeroMQ adapter with request/reply, publish/subscribe, push/pull and
//!   router/dealer endpoints
//! - A scheduling adapter that drives services and outbound client calls
//! - Signal-driven shutdown and file-watch restarts
//!
//! ## Architecture
//!
//! ```text
//!   ServiceDefinition ─┐                     ┌─▶ ZeroMqAdapter ── thread per function
//!                      ├─▶ Registries ─▶ Orchestrator ─┤
//!   ClientDefinition ──┘        (frozen)     ├─▶ CronAdapter ──── thread per job
//!                                            └─▶ provided adapters (http, grpc, ...)
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod adapters;
pub mod client;
pub mod registry;
pub mod runtime;
pub mod types;

pub mod observability;

pub use registry::{ClientDefinition, Kwargs, ServiceDefinition, ServiceFunction};
pub use runtime::{run_services, Orchestrator, RunningServices};
pub use types::{Config, Error, Protocol, Result};
