//! FIFO correlation of buffer completions to in-flight requests
//!
//! The hardware completes buffers of a stream in the order they were queued,
//! so a completion always belongs to the oldest request still waiting on that
//! stream. No search by buffer identity is done: a device that breaks the
//! ordering completes the wrong request.

use std::collections::VecDeque;

use tracing::warn;

use crate::capture::{BufferMetadata, StreamId};
use crate::error::{Error, Result};

use super::request::{Request, RequestStatus};

/// Outcome of correlating one buffer completion
#[derive(Debug)]
pub struct Correlation {
    /// Cookie of the request the buffer was attributed to
    pub request: u64,
    /// Buffer index the request holds for the stream
    pub index: usize,
    /// Requests finished by this completion, in submission order
    pub completed: Vec<Request>,
}

/// Queued-but-not-completed requests of one camera, oldest first
#[derive(Debug, Default)]
pub struct InFlightQueue {
    requests: VecDeque<Request>,
}

impl InFlightQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: Request) {
        self.requests.push_back(request);
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn front(&self) -> Option<&Request> {
        self.requests.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Request> {
        self.requests.iter()
    }

    /// Attribute a completed buffer of `stream` to the oldest request
    /// waiting on that stream.
    ///
    /// For single-stream cameras this is always the front request. Finished
    /// requests leave the queue only from the front, so completion order
    /// matches submission order.
    pub fn correlate(
        &mut self,
        stream: StreamId,
        index: usize,
        metadata: BufferMetadata,
    ) -> Result<Correlation> {
        let Some(target) = self.requests.iter_mut().find(|r| r.is_pending_on(stream)) else {
            return Err(Error::ProtocolViolation(format!(
                "buffer {index} of {stream} completed with no request in flight"
            )));
        };

        let request = target.cookie();
        let recorded = target.complete_buffer(stream, metadata).unwrap_or(index);
        if recorded != index {
            warn!(
                request,
                %stream,
                expected = recorded,
                actual = index,
                "Buffer completed out of order"
            );
        }

        let mut completed = Vec::new();
        while self
            .requests
            .front()
            .is_some_and(|front| !front.has_pending_buffers())
        {
            if let Some(mut done) = self.requests.pop_front() {
                done.finish(RequestStatus::Complete);
                completed.push(done);
            }
        }

        Ok(Correlation {
            request,
            index: recorded,
            completed,
        })
    }

    /// Remove every in-flight request, marking it cancelled
    pub fn cancel_all(&mut self) -> Vec<Request> {
        self.requests
            .drain(..)
            .map(|mut request| {
                request.finish(RequestStatus::Cancelled);
                request
            })
            .collect()
    }
}
