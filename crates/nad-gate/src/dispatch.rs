//! I/O dispatcher
//!
//! Fans a pending operation out to every node of the pool and answers with
//! the first success. Reads take the fastest node's data, writes succeed on
//! the first acknowledgement and leave the other puts running in the
//! background.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use nad_common::Error;
use tracing::{debug, warn};

use crate::buffer::WorkingBuffer;
use crate::op::{Opcode, PendingOperation};
use crate::pool::NodePool;
use crate::race::{RaceError, first_success};

/// How long a dispatch waits for the first successful node
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-device operation counters
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub reads: AtomicU64,
    pub writes: AtomicU64,
    pub deletes: AtomicU64,
    pub unsupported: AtomicU64,
    pub failed: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub reads: u64,
    pub writes: u64,
    pub deletes: u64,
    pub unsupported: u64,
    pub failed: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl DispatchStats {
    fn record(&self, op: &PendingOperation) {
        let counter = match op.opcode {
            Opcode::Read => &self.reads,
            Opcode::Write => &self.writes,
            Opcode::Delete => &self.deletes,
            Opcode::Unsupported(_) => &self.unsupported,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if !op.is_ok() {
            self.failed.fetch_add(1, Ordering::Relaxed);
            return;
        }
        match op.opcode {
            Opcode::Read => self.bytes_read.fetch_add(op.length, Ordering::Relaxed),
            Opcode::Write => self.bytes_written.fetch_add(op.length, Ordering::Relaxed),
            _ => 0,
        };
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            unsupported: self.unsupported.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

/// Routes operations of one device to its node pool
pub struct Dispatcher {
    pool: Arc<NodePool>,
    timeout: Duration,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(pool: Arc<NodePool>, timeout: Duration) -> Self {
        Self {
            pool,
            timeout,
            stats: DispatchStats::default(),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Serve `op`, leaving the outcome in `op.error` and, for reads, the
    /// data in `buffer`.
    ///
    /// `buffer` must already hold at least `op.length` bytes.
    pub async fn dispatch(&self, op: &mut PendingOperation, buffer: &mut WorkingBuffer) {
        match op.opcode {
            Opcode::Read => self.read(op, buffer).await,
            Opcode::Write => self.write(op, buffer).await,
            // Nothing to reclaim on a plain file
            Opcode::Delete => op.succeed(),
            Opcode::Unsupported(cmd) => {
                debug!(seq = op.seq, cmd, "unsupported operation");
                op.fail(libc::EOPNOTSUPP);
            }
        }
        self.stats.record(op);
    }

    async fn read(&self, op: &mut PendingOperation, buffer: &mut WorkingBuffer) {
        let (offset, length) = (op.offset, op.length);
        let candidates = self
            .pool
            .nodes()
            .iter()
            .map(|node| {
                let client = Arc::clone(&node.client);
                let address = node.address.clone();
                async move {
                    let payload = client.get(offset, length).await?;
                    if payload.len() as u64 != length {
                        return Err(Error::remote(format!(
                            "{address}: returned {} bytes for a {length} byte read",
                            payload.len()
                        )));
                    }
                    Ok(payload)
                }
            })
            .collect::<Vec<_>>();

        match first_success(candidates, self.timeout).await {
            Ok(winner) => {
                let payload = winner.value;
                buffer.as_mut_slice()[..payload.len()].copy_from_slice(&payload);
                op.succeed();
                debug!(
                    seq = op.seq,
                    offset,
                    length = op.length,
                    node = %self.pool.nodes()[winner.index].address,
                    "read served"
                );
            }
            Err(e) => {
                self.log_failures("read", op, &e);
                op.fail(libc::EIO);
            }
        }
    }

    async fn write(&self, op: &mut PendingOperation, buffer: &WorkingBuffer) {
        let (offset, length) = (op.offset, op.length);
        // One copy out of the kernel buffer, shared by every put
        let payload = Bytes::copy_from_slice(&buffer.as_slice()[..length as usize]);
        let candidates = self
            .pool
            .nodes()
            .iter()
            .map(|node| {
                let client = Arc::clone(&node.client);
                let address = node.address.clone();
                let payload = payload.clone();
                async move {
                    let written = client.put(offset, payload).await?;
                    if written != length {
                        return Err(Error::remote(format!(
                            "{address}: wrote {written} of {length} bytes"
                        )));
                    }
                    Ok(written)
                }
            })
            .collect::<Vec<_>>();

        match first_success(candidates, self.timeout).await {
            Ok(winner) => {
                op.succeed();
                debug!(
                    seq = op.seq,
                    offset,
                    length,
                    node = %self.pool.nodes()[winner.index].address,
                    "write acknowledged"
                );
            }
            Err(e) => {
                self.log_failures("write", op, &e);
                op.fail(libc::EIO);
            }
        }
    }

    fn log_failures(&self, kind: &str, op: &PendingOperation, err: &RaceError<Error>) {
        for (index, cause) in err.failures() {
            warn!(
                seq = op.seq,
                node = %self.pool.nodes()[*index].address,
                "{} failed: {}",
                kind,
                cause
            );
        }
        warn!(
            seq = op.seq,
            offset = op.offset,
            length = op.length,
            "{} returned EIO: {}",
            kind,
            err
        );
    }
}
