//! In-memory storage nodes for unit tests

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use nad_common::{Error, Result};
use parking_lot::Mutex;

use crate::pool::BlockNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Healthy,
    /// Refuses every call immediately
    Down,
    /// Never answers
    Hang,
    /// Answers after a delay
    Delay(Duration),
    /// Returns at most this many bytes from a get
    Truncate(usize),
}

#[derive(Clone)]
pub struct MemoryNode {
    address: String,
    data: Arc<Mutex<Vec<u8>>>,
    behavior: Arc<Mutex<Behavior>>,
    gets: Arc<AtomicUsize>,
    puts: Arc<AtomicUsize>,
}

impl MemoryNode {
    pub fn new(address: &str, capacity: usize) -> Self {
        Self {
            address: address.to_string(),
            data: Arc::new(Mutex::new(vec![0; capacity])),
            behavior: Arc::new(Mutex::new(Behavior::Healthy)),
            gets: Arc::new(AtomicUsize::new(0)),
            puts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Node whose whole media is filled with `byte`
    pub fn filled(address: &str, capacity: usize, byte: u8) -> Self {
        let node = Self::new(address, capacity);
        node.data.lock().fill(byte);
        node
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn set_down(&self, down: bool) {
        self.set_behavior(if down {
            Behavior::Down
        } else {
            Behavior::Healthy
        });
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn contents(&self, offset: usize, length: usize) -> Vec<u8> {
        self.data.lock()[offset..offset + length].to_vec()
    }

    pub fn shared(&self) -> Arc<dyn BlockNode> {
        Arc::new(self.clone())
    }

    async fn gate(&self) -> Result<()> {
        let behavior = *self.behavior.lock();
        match behavior {
            Behavior::Healthy | Behavior::Truncate(_) => Ok(()),
            Behavior::Down => Err(Error::ConnectionFailed(format!(
                "{}: connection refused",
                self.address
            ))),
            Behavior::Hang => std::future::pending().await,
            Behavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }

    fn range(&self, offset: u64, length: u64) -> Result<std::ops::Range<usize>> {
        let media_size = self.data.lock().len() as u64;
        match offset.checked_add(length) {
            Some(end) if end <= media_size => Ok(offset as usize..end as usize),
            _ => Err(Error::OutOfRange {
                offset,
                length,
                media_size,
            }),
        }
    }
}

#[async_trait]
impl BlockNode for MemoryNode {
    fn address(&self) -> &str {
        &self.address
    }

    async fn info(&self) -> Result<u64> {
        self.gate().await?;
        Ok(self.data.lock().len() as u64)
    }

    async fn get(&self, offset: u64, length: u64) -> Result<Bytes> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        let mut range = self.range(offset, length)?;
        if let Behavior::Truncate(limit) = *self.behavior.lock() {
            range.end = range.end.min(range.start + limit);
        }
        Ok(Bytes::copy_from_slice(&self.data.lock()[range]))
    }

    async fn put(&self, offset: u64, payload: Bytes) -> Result<u64> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.gate().await?;
        let range = self.range(offset, payload.len() as u64)?;
        self.data.lock()[range].copy_from_slice(&payload);
        Ok(payload.len() as u64)
    }
}
