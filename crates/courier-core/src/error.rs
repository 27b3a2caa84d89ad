//! Courier error types.

use thiserror::Error;

/// Errors shared by every Courier crate.
#[derive(Debug, Error)]
pub enum CourierError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    /// Store could not be reached at all (locked, missing, I/O).
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Tracker error: {0}")]
    Tracker(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CourierError>;
