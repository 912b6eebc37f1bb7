use super::DurableQueue;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// In-process queue with the [`DurableQueue`] contract minus the durability.
///
/// Useful in tests and for deployments that accept losing parked messages on
/// restart.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    items: VecDeque<Vec<u8>>,
    closed: bool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableQueue for MemoryQueue {
    async fn enqueue(&self, item: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::Closed);
        }
        inner.items.push_back(item.to_vec());
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::Closed);
        }
        Ok(inner.items.pop_front())
    }

    fn len(&self) -> u64 {
        self.inner.lock().items.len() as u64
    }

    async fn close(&self) -> Result<()> {
        self.inner.lock().closed = true;
        Ok(())
    }
}
