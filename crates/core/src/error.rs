//! Error kinds shared across the connection, session and pipeline layers (§7).

use thiserror::Error;

/// Top-level error taxonomy for the service core.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Frame or semantic protocol violation. Closes the offending
    /// connection; never terminates the service.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Keepalive round-trip exceeded. Closes the connection.
    #[error("keepalive timeout")]
    Timeout,

    /// A processor's transport (directory HTTP, database) failed in a way
    /// that is retried with exponential backoff by the caller.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Cooperative cancellation; propagated without error-level logging.
    #[error("cancelled")]
    Cancelled,

    /// Fatal misconfiguration discovered at startup.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ServiceError {
    /// True for [`ServiceError::Cancelled`], the one variant that must not
    /// be logged at error severity or cause a processor to be dropped.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ServiceError::Cancelled)
    }
}

/// Convenience alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, ServiceError>;
