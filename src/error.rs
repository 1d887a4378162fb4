//! Crate-level error type.

use std::io;

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that end a run.
///
/// Per-host failures never show up here; they are collected by the fleet
/// executor instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cannot initialize logging: {0}")]
    Logging(#[source] io::Error),

    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),

    #[error("{0}")]
    Usage(String),
}

impl Error {
    /// Process exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            _ => 1,
        }
    }
}

/// Result alias using the crate error.
pub type Result<T> = std::result::Result<T, Error>;
