//! GEOM Gate control structures (`geom/gate/g_gate.h`, version 3)
//!
//! Field layout of the structures exchanged through `/dev/ggctl`. The
//! offsets below are for 64-bit targets and are checked at compile time:
//!
//! ```text
//! g_gate_ctl_io (56 bytes)
//!   0  u_int      gctl_version
//!   4  int        gctl_unit
//!   8  uintptr_t  gctl_seq
//!  16  u_int      gctl_cmd
//!  24  off_t      gctl_offset
//!  32  off_t      gctl_length
//!  40  void *     gctl_data
//!  48  int        gctl_error
//!
//! g_gate_ctl_create (2608 bytes)
//!   0  u_int      gctl_version
//!   8  off_t      gctl_mediasize
//!  16  u_int      gctl_sectorsize
//!  20  u_int      gctl_flags
//!  24  u_int      gctl_maxcount
//!  28  u_int      gctl_timeout
//!  32  char[255]  gctl_name
//! 287  char[2048] gctl_info
//! 2335 char[255]  gctl_readprov
//! 2592 off_t      gctl_readoffset
//! 2600 int        gctl_unit
//!
//! g_gate_ctl_destroy (268 bytes)
//!   0  u_int      gctl_version
//!   4  int        gctl_unit
//!   8  char[255]  gctl_name
//! 264  int        gctl_force
//!
//! g_gate_ctl_cancel (272 bytes)
//!   0  u_int      gctl_version
//!   4  int        gctl_unit
//!   8  char[255]  gctl_name
//! 264  uintptr_t  gctl_seq
//! ```

#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use std::ffi::{c_char, c_void};

use crate::bridge::{BridgeError, CreateRequest, Fetch};
use crate::buffer::WorkingBuffer;
use crate::op::{Opcode, PendingOperation};

pub const G_GATE_VERSION: u32 = 3;
pub const G_GATE_CTL_PATH: &str = "/dev/ggctl";
pub const G_GATE_INFOSIZE: usize = 2048;
pub const NAME_MAX: usize = 255;

/// ioctl command numbers, `_IOWR('m', n, ...)`
pub const G_GATE_CMD_CREATE: u8 = 0;
pub const G_GATE_CMD_DESTROY: u8 = 2;
pub const G_GATE_CMD_CANCEL: u8 = 3;
pub const G_GATE_CMD_START: u8 = 4;
pub const G_GATE_CMD_DONE: u8 = 5;
pub const G_GATE_IOCTL_GROUP: u8 = b'm';

/// `struct g_gate_ctl_io`
#[repr(C)]
#[derive(Debug)]
pub struct GateCtlIo {
    pub version: u32,
    pub unit: i32,
    pub seq: usize,
    pub cmd: u32,
    pub offset: i64,
    pub length: i64,
    pub data: *mut c_void,
    pub error: i32,
}

/// `struct g_gate_ctl_create`
#[repr(C)]
pub struct GateCtlCreate {
    pub version: u32,
    pub mediasize: i64,
    pub sectorsize: u32,
    pub flags: u32,
    pub maxcount: u32,
    pub timeout: u32,
    pub name: [c_char; NAME_MAX],
    pub info: [c_char; G_GATE_INFOSIZE],
    pub readprov: [c_char; NAME_MAX],
    pub readoffset: i64,
    pub unit: i32,
}

/// `struct g_gate_ctl_destroy`
#[repr(C)]
pub struct GateCtlDestroy {
    pub version: u32,
    pub unit: i32,
    pub name: [c_char; NAME_MAX],
    pub force: i32,
}

/// `struct g_gate_ctl_cancel`
#[repr(C)]
pub struct GateCtlCancel {
    pub version: u32,
    pub unit: i32,
    pub name: [c_char; NAME_MAX],
    pub seq: usize,
}

#[cfg(target_pointer_width = "64")]
const _: () = {
    use std::mem::{offset_of, size_of};

    assert!(offset_of!(GateCtlIo, version) == 0);
    assert!(offset_of!(GateCtlIo, unit) == 4);
    assert!(offset_of!(GateCtlIo, seq) == 8);
    assert!(offset_of!(GateCtlIo, cmd) == 16);
    assert!(offset_of!(GateCtlIo, offset) == 24);
    assert!(offset_of!(GateCtlIo, length) == 32);
    assert!(offset_of!(GateCtlIo, data) == 40);
    assert!(offset_of!(GateCtlIo, error) == 48);
    assert!(size_of::<GateCtlIo>() == 56);

    assert!(offset_of!(GateCtlCreate, mediasize) == 8);
    assert!(offset_of!(GateCtlCreate, name) == 32);
    assert!(offset_of!(GateCtlCreate, info) == 287);
    assert!(offset_of!(GateCtlCreate, readprov) == 2335);
    assert!(offset_of!(GateCtlCreate, readoffset) == 2592);
    assert!(offset_of!(GateCtlCreate, unit) == 2600);
    assert!(size_of::<GateCtlCreate>() == 2608);

    assert!(offset_of!(GateCtlDestroy, force) == 264);
    assert!(size_of::<GateCtlDestroy>() == 268);

    assert!(offset_of!(GateCtlCancel, seq) == 264);
    assert!(size_of::<GateCtlCancel>() == 272);
};

/// Copy `src` into a fixed C string field, truncating and NUL terminating
fn fill_c_string(dst: &mut [c_char], src: &str) {
    let len = src.len().min(dst.len().saturating_sub(1));
    for (d, s) in dst.iter_mut().zip(&src.as_bytes()[..len]) {
        *d = *s as c_char;
    }
    dst[len..].fill(0);
}

impl GateCtlIo {
    /// START request offering `buffer` as the transfer area
    pub fn fetch_request(unit: i32, buffer: &mut WorkingBuffer) -> Self {
        Self {
            version: G_GATE_VERSION,
            unit,
            seq: 0,
            cmd: 0,
            offset: 0,
            length: buffer.capacity() as i64,
            data: buffer.as_mut_ptr().cast(),
            error: 0,
        }
    }

    /// DONE request for a finished operation
    pub fn completion(unit: i32, op: &PendingOperation, buffer: &mut WorkingBuffer) -> Self {
        Self {
            version: G_GATE_VERSION,
            unit,
            seq: op.seq as usize,
            cmd: op.opcode.into(),
            offset: op.offset as i64,
            length: op.length as i64,
            data: buffer.as_mut_ptr().cast(),
            error: op.error,
        }
    }

    /// Interpret a START reply
    ///
    /// The kernel also answers ECANCELED when a signal interrupts the wait,
    /// so a signal delivered to the serve thread ends its loop.
    pub fn fetch_outcome(&self) -> Result<Fetch, BridgeError> {
        let length = u64::try_from(self.length).unwrap_or_default();
        match self.error {
            0 => Ok(Fetch::Ready(PendingOperation::new(
                self.seq as u64,
                Opcode::from(self.cmd),
                u64::try_from(self.offset).unwrap_or_default(),
                length,
            ))),
            libc::ENOMEM => Ok(Fetch::NeedSpace(length)),
            libc::ECANCELED => Ok(Fetch::Cancelled),
            errno => Err(BridgeError::Kernel {
                command: "START",
                errno,
            }),
        }
    }
}

impl GateCtlCreate {
    pub fn new(request: &CreateRequest) -> Self {
        let mut create = Self {
            version: G_GATE_VERSION,
            mediasize: request.media_size as i64,
            sectorsize: request.sector_size,
            flags: 0,
            maxcount: request.max_count,
            timeout: request.timeout_secs,
            name: [0; NAME_MAX],
            info: [0; G_GATE_INFOSIZE],
            readprov: [0; NAME_MAX],
            readoffset: 0,
            unit: request.unit,
        };
        fill_c_string(&mut create.info, &request.info);
        create
    }
}

impl GateCtlDestroy {
    pub fn new(unit: i32, force: bool) -> Self {
        Self {
            version: G_GATE_VERSION,
            unit,
            name: [0; NAME_MAX],
            force: i32::from(force),
        }
    }
}

impl GateCtlCancel {
    /// Cancel every queued request of `unit`
    pub fn all(unit: i32) -> Self {
        Self {
            version: G_GATE_VERSION,
            unit,
            name: [0; NAME_MAX],
            seq: 0,
        }
    }
}
