//! Error types for configuration loading (§6.2).

use std::path::PathBuf;

use thiserror::Error;

/// Failures loading or parsing a recceiver-style config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {error}")]
    Io { path: PathBuf, error: std::io::Error },

    #[error("ini parse error in {path}: {error}")]
    Ini { path: PathBuf, error: ini::Error },

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("procs names an unknown processor: {0}")]
    UnknownProcessor(String),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
