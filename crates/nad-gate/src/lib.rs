//! NAD Gate - replicated block device gateway
//!
//! Exposes one GEOM Gate device per node set. Every write is sent to all
//! storage nodes, every read races all of them; the first success answers
//! the kernel and a fixed deadline bounds how long a dead replica can stall
//! the device.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │  kernel (ggate)  │
//! └────────┬─────────┘
//!          │ START / DONE
//! ┌────────▼─────────┐
//! │ ControlBridge    │  platform layer
//! ├──────────────────┤
//! │ Device           │  serve loop + WorkingBuffer
//! │  └─ Dispatcher   │  fan-out, first success wins
//! └────────┬─────────┘
//!          │ Info / Get / Put
//!    ┌─────┼─────┐
//!    ▼     ▼     ▼
//!  node  node  node
//! ```

pub mod bridge;
pub mod buffer;
pub mod dispatch;
pub mod error;
pub mod op;
pub mod platform;
pub mod pool;
pub mod race;
pub mod serve;

#[cfg(test)]
pub(crate) mod testing;

pub use bridge::{BridgeError, BridgeState, ControlBridge, CreateRequest, DeviceControl, Fetch};
pub use buffer::WorkingBuffer;
pub use dispatch::{DispatchStats, Dispatcher, StatsSnapshot};
pub use error::{GateError, GateResult};
pub use op::{Opcode, PendingOperation};
pub use pool::{BlockNode, GrpcNode, NodeOptions, NodePool, StorageNode};
pub use serve::{Device, spawn_device};
