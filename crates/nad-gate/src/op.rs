//! Pending block operations as handed over by the kernel.

/// BIO command codes from `sys/bio.h`
pub const BIO_READ: u32 = 0x01;
pub const BIO_WRITE: u32 = 0x02;
pub const BIO_DELETE: u32 = 0x03;

/// Kind of block request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Read,
    Write,
    Delete,
    /// Anything else the kernel sends (flush, getattr, ...), with its raw code
    Unsupported(u32),
}

impl From<u32> for Opcode {
    fn from(cmd: u32) -> Self {
        match cmd {
            BIO_READ => Self::Read,
            BIO_WRITE => Self::Write,
            BIO_DELETE => Self::Delete,
            other => Self::Unsupported(other),
        }
    }
}

impl From<Opcode> for u32 {
    fn from(op: Opcode) -> Self {
        match op {
            Opcode::Read => BIO_READ,
            Opcode::Write => BIO_WRITE,
            Opcode::Delete => BIO_DELETE,
            Opcode::Unsupported(cmd) => cmd,
        }
    }
}

/// One kernel-issued block request awaiting service.
///
/// The data region lives in the device's [`WorkingBuffer`](crate::WorkingBuffer);
/// `length` bytes of it belong to this operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation {
    /// Kernel cookie echoed back on completion
    pub seq: u64,
    pub opcode: Opcode,
    pub offset: u64,
    /// Requested length on fetch, actual length after dispatch
    pub length: u64,
    /// errno reported to the kernel, 0 on success
    pub error: i32,
}

impl PendingOperation {
    pub fn new(seq: u64, opcode: Opcode, offset: u64, length: u64) -> Self {
        Self {
            seq,
            opcode,
            offset,
            length,
            error: 0,
        }
    }

    pub fn succeed(&mut self) {
        self.error = 0;
    }

    pub fn fail(&mut self, errno: i32) {
        self.error = errno;
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error == 0
    }
}
