//! Error types for the placescout host.

use placescout_discovery::DiscoveryError;

/// Top-level error type for the service host.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Configuration file could not be parsed or failed validation.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The discovery engine could not be started.
    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, HostError>;
