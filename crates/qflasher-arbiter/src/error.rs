//! Error types for the flash arbiter

use thiserror::Error;

/// Errors returned by [`QspiFlash`](crate::QspiFlash)
#[derive(Error, Debug)]
pub enum ArbiterError {
    /// Device bring-up or transport error
    #[error("Flash error: {0}")]
    Core(#[from] qflasher_core::Error),

    /// The dispatcher thread could not be started
    #[error("Failed to spawn dispatcher thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// A low-level call could not take the flash without blocking
    #[error("Flash is locked by another context")]
    LockUnavailable,

    /// A low-level call was made while the dispatcher is running
    #[error("Dispatcher is not parked")]
    NotParked,

    /// `ll_setup` was called while a low-level window is already open
    #[error("Dispatcher is already parked")]
    AlreadyParked,

    /// The dispatcher thread is gone
    #[error("Dispatcher has stopped")]
    Disconnected,

    /// Invalid configuration parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type for arbiter operations
pub type Result<T> = std::result::Result<T, ArbiterError>;
