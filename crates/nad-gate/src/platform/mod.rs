//! Kernel block interface, one implementation per target OS
//!
//! Only FreeBSD has GEOM Gate. Elsewhere [`open_control`] reports the
//! platform as unsupported; the dispatch logic itself is portable.

pub mod ctl;

#[cfg(target_os = "freebsd")]
mod freebsd;
#[cfg(not(target_os = "freebsd"))]
mod unsupported;

use crate::bridge::{BridgeError, DeviceControl};

/// Open the kernel control device
#[cfg(target_os = "freebsd")]
pub fn open_control() -> Result<Box<dyn DeviceControl>, BridgeError> {
    Ok(Box::new(freebsd::GateControl::open()?))
}

/// Open the kernel control device
#[cfg(not(target_os = "freebsd"))]
pub fn open_control() -> Result<Box<dyn DeviceControl>, BridgeError> {
    unsupported::open_control()
}
