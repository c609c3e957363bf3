//! GEOM Gate ioctls on `/dev/ggctl`

#![allow(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;

use nix::errno::Errno;
use tracing::info;

use super::ctl::{
    G_GATE_CMD_CANCEL, G_GATE_CMD_CREATE, G_GATE_CMD_DESTROY, G_GATE_CMD_DONE, G_GATE_CMD_START,
    G_GATE_CTL_PATH, G_GATE_IOCTL_GROUP, GateCtlCancel, GateCtlCreate, GateCtlDestroy, GateCtlIo,
};
use crate::bridge::{BridgeError, ControlBridge, CreateRequest, DeviceControl, Fetch};
use crate::buffer::WorkingBuffer;
use crate::op::PendingOperation;

nix::ioctl_readwrite!(gate_create, G_GATE_IOCTL_GROUP, G_GATE_CMD_CREATE, GateCtlCreate);
nix::ioctl_readwrite!(gate_destroy, G_GATE_IOCTL_GROUP, G_GATE_CMD_DESTROY, GateCtlDestroy);
nix::ioctl_readwrite!(gate_cancel, G_GATE_IOCTL_GROUP, G_GATE_CMD_CANCEL, GateCtlCancel);
nix::ioctl_readwrite!(gate_start, G_GATE_IOCTL_GROUP, G_GATE_CMD_START, GateCtlIo);
nix::ioctl_readwrite!(gate_done, G_GATE_IOCTL_GROUP, G_GATE_CMD_DONE, GateCtlIo);

fn ioctl_error(command: &'static str, errno: Errno) -> BridgeError {
    BridgeError::Ioctl {
        command,
        source: errno.into(),
    }
}

/// Handle on the GEOM Gate control device
pub struct GateControl {
    file: File,
}

impl GateControl {
    pub fn open() -> Result<Self, BridgeError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(G_GATE_CTL_PATH)
            .map_err(|source| BridgeError::Open {
                path: G_GATE_CTL_PATH.to_string(),
                source,
            })?;
        Ok(Self { file })
    }
}

impl DeviceControl for GateControl {
    fn create(&self, request: &CreateRequest) -> Result<i32, BridgeError> {
        let mut ctl = GateCtlCreate::new(request);
        // SAFETY: `ctl` is a live, correctly laid out g_gate_ctl_create.
        unsafe { gate_create(self.file.as_raw_fd(), &mut ctl) }
            .map_err(|e| ioctl_error("CREATE", e))?;
        info!(
            unit = ctl.unit,
            media_size = request.media_size,
            sector_size = request.sector_size,
            "created ggate device"
        );
        Ok(ctl.unit)
    }

    fn destroy(&self, unit: i32, force: bool) -> Result<(), BridgeError> {
        let mut ctl = GateCtlDestroy::new(unit, force);
        // SAFETY: `ctl` is a live, correctly laid out g_gate_ctl_destroy.
        unsafe { gate_destroy(self.file.as_raw_fd(), &mut ctl) }
            .map_err(|e| ioctl_error("DESTROY", e))?;
        info!(unit, force, "destroyed ggate device");
        Ok(())
    }

    fn cancel(&self, unit: i32) -> Result<(), BridgeError> {
        let mut ctl = GateCtlCancel::all(unit);
        // SAFETY: `ctl` is a live, correctly laid out g_gate_ctl_cancel.
        unsafe { gate_cancel(self.file.as_raw_fd(), &mut ctl) }
            .map_err(|e| ioctl_error("CANCEL", e))?;
        info!(unit, "cancelled queued requests");
        Ok(())
    }

    fn open_bridge(&self, unit: i32) -> Result<Box<dyn ControlBridge + Send>, BridgeError> {
        let file = self.file.try_clone().map_err(|source| BridgeError::Open {
            path: G_GATE_CTL_PATH.to_string(),
            source,
        })?;
        Ok(Box::new(GateBridge { file, unit }))
    }
}

/// START/DONE exchange for one unit
pub struct GateBridge {
    file: File,
    unit: i32,
}

impl ControlBridge for GateBridge {
    fn fetch(&mut self, buffer: &mut WorkingBuffer) -> Result<Fetch, BridgeError> {
        let mut io = GateCtlIo::fetch_request(self.unit, buffer);
        // SAFETY: `io.data` points at `buffer`, which is `io.length` bytes
        // long and stays borrowed for the duration of the call.
        unsafe { gate_start(self.file.as_raw_fd(), &mut io) }
            .map_err(|e| ioctl_error("START", e))?;
        io.fetch_outcome()
    }

    fn complete(
        &mut self,
        op: &PendingOperation,
        buffer: &mut WorkingBuffer,
    ) -> Result<(), BridgeError> {
        let mut io = GateCtlIo::completion(self.unit, op, buffer);
        // SAFETY: `io.data` points at `buffer`, which holds at least
        // `op.length` bytes and stays borrowed for the duration of the call.
        unsafe { gate_done(self.file.as_raw_fd(), &mut io) }
            .map_err(|e| ioctl_error("DONE", e))?;
        Ok(())
    }
}
