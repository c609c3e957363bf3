//! Per-device serve loop
//!
//! Each attached device runs fetch, dispatch and complete strictly in
//! sequence on its own OS thread. Node fan-out happens on the shared tokio
//! runtime through a [`Handle`].

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, error, info};

use crate::bridge::{BridgeState, ControlBridge, Fetch};
use crate::buffer::WorkingBuffer;
use crate::dispatch::{Dispatcher, StatsSnapshot};
use crate::error::GateResult;
use crate::op::Opcode;
use crate::pool::NodePool;

/// Everything one attached device owns
pub struct Device {
    unit: i32,
    dispatcher: Dispatcher,
    buffer: WorkingBuffer,
    state: BridgeState,
}

impl Device {
    /// Device context for `unit`, with an initial buffer of one block
    pub fn new(unit: i32, pool: Arc<NodePool>, timeout: Duration) -> GateResult<Self> {
        let buffer = WorkingBuffer::new(pool.block_size() as usize)?;
        Ok(Self {
            unit,
            dispatcher: Dispatcher::new(pool, timeout),
            buffer,
            state: BridgeState::Idle,
        })
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.dispatcher.stats()
    }

    /// Serve operations until the device is destroyed or the bridge fails.
    ///
    /// Returns the device's counters on a clean shutdown. Must not be
    /// called from inside the runtime `handle` belongs to.
    pub fn serve<B>(&mut self, handle: &Handle, bridge: &mut B) -> GateResult<StatsSnapshot>
    where
        B: ControlBridge + ?Sized,
    {
        info!(unit = self.unit, "serving device");
        let result = self.run(handle, bridge);
        match &result {
            Ok(stats) => info!(unit = self.unit, ?stats, "device stopped"),
            Err(e) => error!(
                unit = self.unit,
                state = ?self.state,
                "serve loop failed: {}",
                e
            ),
        }
        result
    }

    fn run<B>(&mut self, handle: &Handle, bridge: &mut B) -> GateResult<StatsSnapshot>
    where
        B: ControlBridge + ?Sized,
    {
        loop {
            self.state = BridgeState::AwaitingOperation;
            let mut op = match bridge.fetch(&mut self.buffer)? {
                Fetch::Ready(op) => op,
                Fetch::NeedSpace(required) => {
                    self.buffer.ensure_capacity(required)?;
                    continue;
                }
                Fetch::Cancelled => {
                    self.state = BridgeState::Idle;
                    return Ok(self.stats());
                }
            };

            self.state = BridgeState::Dispatching;
            // Delete lengths describe the range, not a transfer
            if op.opcode != Opcode::Delete {
                self.buffer.ensure_capacity(op.length)?;
            }
            handle.block_on(self.dispatcher.dispatch(&mut op, &mut self.buffer));
            debug!(
                unit = self.unit,
                seq = op.seq,
                opcode = ?op.opcode,
                error = op.error,
                "operation dispatched"
            );

            self.state = BridgeState::Completing;
            bridge.complete(&op, &mut self.buffer)?;
            self.state = BridgeState::Idle;
        }
    }
}

/// Run `device` on a dedicated thread named after its unit
pub fn spawn_device(
    mut device: Device,
    handle: Handle,
    mut bridge: Box<dyn ControlBridge + Send>,
) -> std::io::Result<JoinHandle<GateResult<StatsSnapshot>>> {
    std::thread::Builder::new()
        .name(format!("ggate{}", device.unit))
        .spawn(move || device.serve(&handle, bridge.as_mut()))
}
