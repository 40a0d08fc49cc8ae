//! Core types for the polyport runtime.
//!
//! This module provides foundational types used throughout the system:
//! - **Protocol**: the closed protocol universe
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Runtime and adapter configuration

mod config;
mod errors;
mod protocol;

pub use config::{
    duration_field, opt_str_field, str_field, u16_field, AdapterSettings, Config,
    ObservabilityConfig, PROTOCOLS_ENV, WATCH_ENV,
};
pub use errors::{Error, Result};
pub use protocol::{parse_protocol_list, Protocol};
