//! Targets without GEOM Gate

use crate::bridge::{BridgeError, DeviceControl};

pub fn open_control() -> Result<Box<dyn DeviceControl>, BridgeError> {
    Err(BridgeError::Unsupported)
}
