//! Error types for NAD
//!
//! This module defines the common error types used by the storage node
//! service and by the gateway's node clients.

use thiserror::Error;

/// Common result type for NAD operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for NAD
#[derive(Debug, Error)]
pub enum Error {
    // Backing store errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unable to read {requested} bytes at offset {offset}, got {actual}")]
    ShortRead {
        offset: u64,
        requested: u64,
        actual: u64,
    },

    #[error("offset {offset} + length {length} exceeds media size {media_size}")]
    OutOfRange {
        offset: u64,
        length: u64,
        media_size: u64,
    },

    // Node set errors
    #[error(
        "capacity mismatch: node {address} reports {actual} bytes, expected {expected} bytes"
    )]
    CapacityMismatch {
        address: String,
        expected: u64,
        actual: u64,
    },

    // Network/RPC errors
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("request timeout")]
    Timeout,

    #[error("remote call failed: {0}")]
    Remote(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a remote call error
    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }

    /// Errors that make it pointless to start serving at all
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::CapacityMismatch { .. }
        )
    }

    /// Errors that come from an unreachable or slow node rather than a bad request
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Timeout | Self::ConnectionFailed(_))
    }
}
