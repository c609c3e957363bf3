//! Gateway error types

use thiserror::Error;

use crate::bridge::BridgeError;

/// Errors that end a device's serve loop or prevent it from starting
#[derive(Error, Debug)]
pub enum GateError {
    /// Kernel interface failure, the driver is presumed detached
    #[error("control bridge: {0}")]
    Bridge(#[from] BridgeError),

    /// The I/O buffer could not be grown
    #[error("failed to allocate {requested} byte I/O buffer: {reason}")]
    Allocation { requested: u64, reason: String },

    /// Node set could not be built or validated
    #[error(transparent)]
    Node(#[from] nad_common::Error),

    /// Device worker thread panicked
    #[error("device worker for unit {unit} panicked")]
    WorkerPanicked { unit: i32 },
}

/// Result type for gateway operations
pub type GateResult<T> = Result<T, GateError>;
