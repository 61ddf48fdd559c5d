//! Streams and their negotiated configuration

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use super::buffer::BufferPool;
use super::format::{PixelFormat, Size};

static NEXT_STREAM_ID: AtomicU32 = AtomicU32::new(1);

/// Stable handle for a stream, unique for the life of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(u32);

impl StreamId {
    pub(crate) fn next() -> Self {
        Self(NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamRole {
    StillCapture,
    VideoRecording,
    Viewfinder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfiguration {
    pub pixel_format: PixelFormat,
    pub size: Size,
    pub buffer_count: u32,
}

impl StreamConfiguration {
    /// Format and size agree; buffer count is not negotiated with the device
    pub fn same_format(&self, other: &StreamConfiguration) -> bool {
        self.pixel_format == other.pixel_format && self.size == other.size
    }
}

impl fmt::Display for StreamConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.size, self.pixel_format)
    }
}

/// Per-stream configurations for one camera
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CameraConfiguration {
    streams: BTreeMap<StreamId, StreamConfiguration>,
}

impl CameraConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, stream: StreamId, cfg: StreamConfiguration) {
        self.streams.insert(stream, cfg);
    }

    pub fn get(&self, stream: StreamId) -> Option<&StreamConfiguration> {
        self.streams.get(&stream)
    }

    pub fn get_mut(&mut self, stream: StreamId) -> Option<&mut StreamConfiguration> {
        self.streams.get_mut(&stream)
    }

    pub fn iter(&self) -> impl Iterator<Item = (StreamId, &StreamConfiguration)> {
        self.streams.iter().map(|(id, cfg)| (*id, cfg))
    }

    pub fn streams(&self) -> impl Iterator<Item = StreamId> + '_ {
        self.streams.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

/// A named output channel of a camera
#[derive(Debug)]
pub struct Stream {
    id: StreamId,
    configuration: Option<StreamConfiguration>,
    pool: BufferPool,
}

impl Stream {
    pub fn new() -> Self {
        Self {
            id: StreamId::next(),
            configuration: None,
            pool: BufferPool::new(),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn configuration(&self) -> Option<&StreamConfiguration> {
        self.configuration.as_ref()
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub(crate) fn pool_mut(&mut self) -> &mut BufferPool {
        &mut self.pool
    }

    pub(crate) fn set_configuration(&mut self, cfg: StreamConfiguration) {
        self.configuration = Some(cfg);
    }
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}
