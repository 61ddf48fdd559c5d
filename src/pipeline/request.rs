//! Capture requests and the notifications delivered to applications

use std::collections::BTreeMap;

use crate::capture::{BufferMetadata, StreamId};
use crate::error::{Error, Result};

use super::camera::CameraId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Complete,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    index: usize,
    done: bool,
    metadata: Option<BufferMetadata>,
}

/// One capture operation spanning one or more streams.
///
/// Maps each targeted stream to the index of the buffer it should be
/// captured into. A request is moved into the pipeline when queued and handed
/// back exactly once, complete or cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    cookie: u64,
    slots: BTreeMap<StreamId, Slot>,
    status: RequestStatus,
}

impl Request {
    /// `cookie` is opaque to the pipeline and returned with the completion
    pub fn new(cookie: u64) -> Self {
        Self {
            cookie,
            slots: BTreeMap::new(),
            status: RequestStatus::Pending,
        }
    }

    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    /// Attach buffer `index` of `stream`. Each stream takes one buffer.
    pub fn add_buffer(&mut self, stream: StreamId, index: usize) -> Result<()> {
        if self.slots.contains_key(&stream) {
            return Err(Error::ProtocolViolation(format!(
                "request {} already has a buffer for {stream}",
                self.cookie
            )));
        }
        self.slots.insert(
            stream,
            Slot {
                index,
                done: false,
                metadata: None,
            },
        );
        Ok(())
    }

    pub fn find_buffer(&self, stream: StreamId) -> Option<usize> {
        self.slots.get(&stream).map(|slot| slot.index)
    }

    /// `(stream, buffer index)` pairs, ordered by stream
    pub fn buffers(&self) -> impl Iterator<Item = (StreamId, usize)> + '_ {
        self.slots.iter().map(|(stream, slot)| (*stream, slot.index))
    }

    pub fn streams(&self) -> impl Iterator<Item = StreamId> + '_ {
        self.slots.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Metadata of the buffer completed for `stream`, if any
    pub fn metadata(&self, stream: StreamId) -> Option<&BufferMetadata> {
        self.slots.get(&stream).and_then(|slot| slot.metadata.as_ref())
    }

    pub fn is_pending_on(&self, stream: StreamId) -> bool {
        self.slots.get(&stream).is_some_and(|slot| !slot.done)
    }

    pub fn has_pending_buffers(&self) -> bool {
        self.slots.values().any(|slot| !slot.done)
    }

    /// Reset a completed or cancelled request so it can be queued again
    /// with the same buffers
    pub fn reuse(&mut self) {
        for slot in self.slots.values_mut() {
            slot.done = false;
            slot.metadata = None;
        }
        self.status = RequestStatus::Pending;
    }

    /// Mark the buffer for `stream` done. Returns the buffer index recorded
    /// for the stream, or `None` if the stream was not pending.
    pub(crate) fn complete_buffer(&mut self, stream: StreamId, metadata: BufferMetadata) -> Option<usize> {
        let slot = self.slots.get_mut(&stream).filter(|slot| !slot.done)?;
        slot.done = true;
        slot.metadata = Some(metadata);
        Some(slot.index)
    }

    pub(crate) fn finish(&mut self, status: RequestStatus) {
        self.status = status;
    }
}

/// Notifications delivered to the application, in the order they occur
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// One stream of an in-flight request has its buffer filled
    BufferComplete {
        camera: CameraId,
        request: u64,
        stream: StreamId,
        index: usize,
        metadata: BufferMetadata,
    },
    /// The request is done, with status `Complete` or `Cancelled`
    RequestComplete { camera: CameraId, request: Request },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Stream;

    #[test]
    fn one_buffer_per_stream() {
        let stream = Stream::new().id();
        let mut request = Request::new(7);
        request.add_buffer(stream, 0).unwrap();
        assert!(matches!(
            request.add_buffer(stream, 1),
            Err(Error::ProtocolViolation(_))
        ));
        assert_eq!(request.find_buffer(stream), Some(0));
    }

    #[test]
    fn buffer_completes_once() {
        let stream = Stream::new().id();
        let mut request = Request::new(1);
        request.add_buffer(stream, 3).unwrap();

        assert_eq!(request.complete_buffer(stream, BufferMetadata::default()), Some(3));
        assert_eq!(request.complete_buffer(stream, BufferMetadata::default()), None);
        assert!(!request.has_pending_buffers());
    }

    #[test]
    fn reuse_resets_completion() {
        let stream = Stream::new().id();
        let mut request = Request::new(1);
        request.add_buffer(stream, 0).unwrap();
        request.complete_buffer(stream, BufferMetadata::default());
        request.finish(RequestStatus::Complete);

        request.reuse();
        assert_eq!(request.status(), RequestStatus::Pending);
        assert!(request.is_pending_on(stream));
        assert!(request.metadata(stream).is_none());
    }
}
