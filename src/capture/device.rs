//! Hardware collaborator boundary: video nodes and their completion channel

use bytes::Bytes;
use flume::Sender;
use tracing::warn;

use super::buffer::BufferMetadata;
use super::format::{PixelFormat, Size};
use super::stream::StreamId;
use crate::error::Result;
use crate::media::Entity;
use crate::pipeline::CameraId;

/// Format as programmed into, and read back from, a video node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFormat {
    pub pixel_format: PixelFormat,
    pub size: Size,
}

/// A buffer the hardware has finished filling.
///
/// Carries only buffer identity; correlation to a request happens on the
/// reactor thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferReady {
    pub camera: CameraId,
    pub stream: StreamId,
    pub index: usize,
    pub metadata: BufferMetadata,
}

/// Posts completions for one stream onto the reactor channel.
///
/// Events must be posted in the order buffers were queued.
#[derive(Debug, Clone)]
pub struct BufferNotifier {
    camera: CameraId,
    stream: StreamId,
    tx: Sender<BufferReady>,
}

impl BufferNotifier {
    pub fn new(camera: CameraId, stream: StreamId, tx: Sender<BufferReady>) -> Self {
        Self { camera, stream, tx }
    }

    pub fn camera(&self) -> CameraId {
        self.camera
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }

    /// Returns false once the reactor has gone away
    pub fn notify(&self, index: usize, metadata: BufferMetadata) -> bool {
        let event = BufferReady {
            camera: self.camera,
            stream: self.stream,
            index,
            metadata,
        };
        if self.tx.send(event).is_err() {
            warn!(camera = %self.camera, stream = %self.stream, index, "Reactor gone, dropping completion");
            return false;
        }
        true
    }
}

/// One video node of a bound media graph.
///
/// Calls are synchronous and expected to return at driver latency.
/// Completions are delivered later through the [`BufferNotifier`] handed to
/// the device when it was opened.
pub trait VideoDevice: Send {
    fn name(&self) -> &str;

    /// Program `format` and return what the device actually applied
    fn set_format(&mut self, format: &DeviceFormat) -> Result<DeviceFormat>;

    /// Export `count` buffers, in index order
    fn export_buffers(&mut self, count: u32) -> Result<Vec<Bytes>>;

    fn release_buffers(&mut self) -> Result<()>;

    fn stream_on(&mut self) -> Result<()>;

    /// Stop streaming. No completion is posted after this returns.
    fn stream_off(&mut self) -> Result<()>;

    fn queue_buffer(&mut self, index: usize) -> Result<()>;
}

/// Opens video devices for the entities of a bound graph
pub trait DeviceProvider: Send + Sync {
    fn open(&self, entity: &Entity, notifier: BufferNotifier) -> Result<Box<dyn VideoDevice>>;
}
