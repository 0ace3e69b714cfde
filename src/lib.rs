//! placescout: HTTP host for the multi-source venue discovery engine.
//!
//! The engine itself lives in the `placescout-discovery` crate; this crate
//! loads configuration, wires up logging and serves the JSON API.

pub mod config;
pub mod error;
pub mod server;

pub use config::{AppConfig, ServerConfig};
pub use error::{HostError, Result};
