//! Buffers and the per-stream pool that owns them

use std::time::Duration;

use bytes::Bytes;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferStatus {
    /// Owned by the pool, free to be attached to a request
    Idle,
    /// Lent to the hardware for one capture
    Queued,
    Done,
    Cancelled,
}

/// Completion metadata reported by the hardware
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferMetadata {
    pub sequence: u64,
    pub bytes_used: usize,
    pub timestamp: Option<Duration>, // Hardware timestamp if available
}

/// One exported memory region
#[derive(Debug, Clone)]
pub struct Buffer {
    index: usize,
    memory: Bytes,
    status: BufferStatus,
    metadata: BufferMetadata,
}

impl Buffer {
    pub fn new(index: usize, memory: Bytes) -> Self {
        Self {
            index,
            memory,
            status: BufferStatus::Idle,
            metadata: BufferMetadata::default(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn memory(&self) -> &Bytes {
        &self.memory
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    pub fn status(&self) -> BufferStatus {
        self.status
    }

    pub fn metadata(&self) -> &BufferMetadata {
        &self.metadata
    }

    /// True while lent to the hardware
    pub fn is_queued(&self) -> bool {
        self.status == BufferStatus::Queued
    }
}

/// The buffers backing one stream, indexed by buffer index.
///
/// Empty until allocation and again after release.
#[derive(Debug, Default)]
pub struct BufferPool {
    buffers: Vec<Buffer>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Buffer> {
        self.buffers.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Buffer> {
        self.buffers.iter()
    }

    /// Take ownership of freshly exported memory. The pool must be empty.
    pub fn populate(&mut self, memory: Vec<Bytes>) -> Result<()> {
        if !self.buffers.is_empty() {
            return Err(Error::ProtocolViolation(format!(
                "buffer pool already holds {} buffers",
                self.buffers.len()
            )));
        }
        self.buffers = memory
            .into_iter()
            .enumerate()
            .map(|(index, memory)| Buffer::new(index, memory))
            .collect();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }

    /// Lend buffer `index` to the hardware
    pub fn mark_queued(&mut self, index: usize) -> Result<()> {
        let buffer = self
            .buffers
            .get_mut(index)
            .ok_or_else(|| Error::NotFound(format!("buffer {index}")))?;
        if buffer.is_queued() {
            return Err(Error::ProtocolViolation(format!(
                "buffer {index} is already in flight"
            )));
        }
        buffer.status = BufferStatus::Queued;
        buffer.metadata = BufferMetadata::default();
        Ok(())
    }

    /// Check that `index` exists and is not currently lent out
    pub fn ensure_available(&self, index: usize) -> Result<()> {
        match self.buffers.get(index) {
            None => Err(Error::NotFound(format!("buffer {index}"))),
            Some(buffer) if buffer.is_queued() => Err(Error::ProtocolViolation(format!(
                "buffer {index} is already in flight"
            ))),
            Some(_) => Ok(()),
        }
    }

    pub(crate) fn complete(&mut self, index: usize, metadata: BufferMetadata) -> Option<&Buffer> {
        let buffer = self.buffers.get_mut(index)?;
        buffer.status = BufferStatus::Done;
        buffer.metadata = metadata;
        Some(buffer)
    }

    pub(crate) fn cancel(&mut self, index: usize) {
        if let Some(buffer) = self.buffers.get_mut(index) {
            if buffer.is_queued() {
                buffer.status = BufferStatus::Cancelled;
            }
        }
    }

    pub fn queued(&self) -> usize {
        self.buffers.iter().filter(|b| b.is_queued()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(count: usize) -> BufferPool {
        let mut pool = BufferPool::new();
        pool.populate((0..count).map(|_| Bytes::from(vec![0u8; 16])).collect())
            .unwrap();
        pool
    }

    #[test]
    fn populate_indexes_in_order() {
        let pool = pool(4);
        assert_eq!(pool.len(), 4);
        assert!(pool.iter().enumerate().all(|(i, b)| b.index() == i));
        assert!(pool.iter().all(|b| b.status() == BufferStatus::Idle));
    }

    #[test]
    fn populate_twice_is_rejected() {
        let mut pool = pool(2);
        let err = pool.populate(vec![Bytes::new()]).unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn buffer_lent_once() {
        let mut pool = pool(2);
        pool.mark_queued(1).unwrap();
        assert!(matches!(pool.ensure_available(1), Err(Error::ProtocolViolation(_))));
        assert!(matches!(pool.mark_queued(1), Err(Error::ProtocolViolation(_))));
        assert!(matches!(pool.mark_queued(7), Err(Error::NotFound(_))));

        let metadata = BufferMetadata {
            sequence: 3,
            bytes_used: 16,
            timestamp: None,
        };
        let done = pool.complete(1, metadata).unwrap();
        assert_eq!(done.status(), BufferStatus::Done);
        assert_eq!(done.metadata().sequence, 3);
        pool.ensure_available(1).unwrap();
    }

    #[test]
    fn cancel_only_touches_queued() {
        let mut pool = pool(2);
        pool.mark_queued(0).unwrap();
        pool.cancel(0);
        pool.cancel(1);
        assert_eq!(pool.get(0).unwrap().status(), BufferStatus::Cancelled);
        assert_eq!(pool.get(1).unwrap().status(), BufferStatus::Idle);
        assert_eq!(pool.queued(), 0);
    }
}
