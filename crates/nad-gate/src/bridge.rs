//! Control-channel bridge to the kernel block interface
//!
//! The serve loop talks to the kernel only through [`ControlBridge`]; the
//! fixed-layout control structures and ioctls live in [`crate::platform`].
//! Tests drive the loop with a scripted bridge instead of a real kernel.

use thiserror::Error;

use crate::buffer::WorkingBuffer;
use crate::op::PendingOperation;

/// Kernel interface failures
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    #[error("{command} ioctl failed: {source}")]
    Ioctl {
        command: &'static str,
        source: std::io::Error,
    },

    #[error("{command} rejected by kernel: {}", std::io::Error::from_raw_os_error(*errno))]
    Kernel { command: &'static str, errno: i32 },

    #[error("GEOM Gate is not available on this platform")]
    Unsupported,
}

/// Outcome of one blocking fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetch {
    /// Next operation; write payloads are already in the buffer
    Ready(PendingOperation),
    /// The pending operation needs a buffer of at least this many bytes
    NeedSpace(u64),
    /// The device is being destroyed
    Cancelled,
}

/// Serve loop position, reported when the loop dies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Idle,
    AwaitingOperation,
    Dispatching,
    Completing,
}

/// Blocking fetch/complete exchange for one attached device
pub trait ControlBridge {
    /// Block until the kernel hands over the next operation.
    fn fetch(&mut self, buffer: &mut WorkingBuffer) -> Result<Fetch, BridgeError>;

    /// Hand a finished operation back. For reads the first `op.length`
    /// bytes of `buffer` are the data.
    fn complete(
        &mut self,
        op: &PendingOperation,
        buffer: &mut WorkingBuffer,
    ) -> Result<(), BridgeError>;
}

/// Parameters for creating a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    /// Requested unit, or `UNIT_AUTO`
    pub unit: i32,
    pub media_size: u64,
    pub sector_size: u32,
    /// Kernel-side request timeout in seconds
    pub timeout_secs: u32,
    pub max_count: u32,
    /// Free-form description shown by `ggatel list -v`
    pub info: String,
}

/// Device lifecycle commands of the kernel interface
pub trait DeviceControl {
    /// Create a device, returning the unit actually assigned
    fn create(&self, request: &CreateRequest) -> Result<i32, BridgeError>;

    fn destroy(&self, unit: i32, force: bool) -> Result<(), BridgeError>;

    /// Fail all requests queued for `unit`
    fn cancel(&self, unit: i32) -> Result<(), BridgeError>;

    /// Open the fetch/complete channel for an existing unit
    fn open_bridge(&self, unit: i32) -> Result<Box<dyn ControlBridge + Send>, BridgeError>;
}
