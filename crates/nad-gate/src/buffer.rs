//! Reusable I/O buffer for one device
//!
//! The kernel copies write payloads into this buffer on fetch and copies
//! read results out of it on completion, so it must always be at least as
//! large as the operation in flight. It only ever grows.

use tracing::{debug, trace};

use crate::error::{GateError, GateResult};

/// Single growable byte region owned by one device's serve loop
#[derive(Debug)]
pub struct WorkingBuffer {
    data: Vec<u8>,
}

impl WorkingBuffer {
    /// Allocate a zeroed buffer of `initial` bytes
    pub fn new(initial: usize) -> GateResult<Self> {
        let mut buffer = Self { data: Vec::new() };
        buffer.ensure_capacity(initial as u64)?;
        Ok(buffer)
    }

    /// Usable size in bytes
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Grow to at least `required` bytes. Returns whether the buffer grew.
    ///
    /// Existing contents are preserved. Allocation failure is reported
    /// instead of aborting so the serve loop can shut down cleanly.
    pub fn ensure_capacity(&mut self, required: u64) -> GateResult<bool> {
        let required_len = usize::try_from(required).map_err(|_| GateError::Allocation {
            requested: required,
            reason: "exceeds address space".to_string(),
        })?;
        if required_len <= self.data.len() {
            return Ok(false);
        }

        let additional = required_len - self.data.len();
        self.data
            .try_reserve_exact(additional)
            .map_err(|e| GateError::Allocation {
                requested: required,
                reason: e.to_string(),
            })?;
        debug!(from = self.data.len(), to = required_len, "growing I/O buffer");
        self.data.resize(required_len, 0);
        Ok(true)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Raw pointer handed to the kernel as the transfer area
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.data.as_mut_ptr()
    }
}

impl Drop for WorkingBuffer {
    fn drop(&mut self) {
        trace!(bytes = self.data.len(), "releasing I/O buffer");
    }
}
