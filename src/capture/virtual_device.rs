//! Emulated video capture node
//!
//! Behaves like a vimc capture node: formats are adjusted to what the node
//! supports, buffers are exported in index order and completed strictly in
//! the order they were queued. The [`VirtualDeviceHandle`] plays the role of
//! the sensor clock and lets callers inject faults.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::buffer::BufferMetadata;
use super::device::{BufferNotifier, DeviceFormat, DeviceProvider, VideoDevice};
use super::format::{PixelFormat, Size};
use crate::error::{Error, Result};
use crate::media::Entity;

/// Capabilities of an emulated node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualDeviceOptions {
    /// Supported formats; the first one is used when an unsupported format is requested
    pub formats: Vec<PixelFormat>,
    pub min_size: Size,
    pub max_size: Size,
    /// Width and height are rounded down to a multiple of this
    pub alignment: u32,
    pub max_buffers: u32,
}

impl Default for VirtualDeviceOptions {
    fn default() -> Self {
        Self {
            formats: vec![PixelFormat::Rgb24, PixelFormat::Bgr24],
            min_size: Size::new(16, 16),
            max_size: Size::new(4096, 2160),
            alignment: 2,
            max_buffers: 32,
        }
    }
}

impl VirtualDeviceOptions {
    fn adjust(&self, requested: &DeviceFormat) -> DeviceFormat {
        let pixel_format = if self.formats.contains(&requested.pixel_format) {
            requested.pixel_format
        } else {
            self.formats.first().copied().unwrap_or(requested.pixel_format)
        };
        let align = self.alignment.max(1);
        let clamp = |v: u32, lo: u32, hi: u32| (v.clamp(lo, hi) / align) * align;

        DeviceFormat {
            pixel_format,
            size: Size::new(
                clamp(requested.size.width, self.min_size.width, self.max_size.width),
                clamp(requested.size.height, self.min_size.height, self.max_size.height),
            ),
        }
    }
}

/// Operations that can be made to fail once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    SetFormat,
    ExportBuffers,
    ReleaseBuffers,
    StreamOn,
    StreamOff,
    QueueBuffer,
}

struct Inner {
    name: String,
    options: VirtualDeviceOptions,
    format: DeviceFormat,
    buffers: Vec<Bytes>,
    queued: VecDeque<usize>,
    streaming: bool,
    sequence: u64,
    faults: Vec<Fault>,
    notifier: BufferNotifier,
    epoch: Instant,
}

impl Inner {
    fn take_fault(&mut self, fault: Fault) -> Result<()> {
        if let Some(pos) = self.faults.iter().position(|f| *f == fault) {
            self.faults.remove(pos);
            return Err(Error::device(&self.name, format!("injected {fault:?} failure")));
        }
        Ok(())
    }

    fn complete(&mut self, index: usize) -> bool {
        self.sequence += 1;
        let metadata = BufferMetadata {
            sequence: self.sequence,
            bytes_used: self.format.pixel_format.frame_size(self.format.size),
            timestamp: Some(self.epoch.elapsed()),
        };
        debug!(device = %self.name, index, sequence = self.sequence, "Buffer filled");
        self.notifier.notify(index, metadata)
    }
}

type Shared = Arc<Mutex<Inner>>;

fn lock(shared: &Shared) -> MutexGuard<'_, Inner> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Emulated capture node
pub struct VirtualVideoDevice {
    name: String,
    inner: Shared,
}

impl VirtualVideoDevice {
    /// Create a node and the handle that drives its completions
    pub fn new(
        name: impl Into<String>,
        options: VirtualDeviceOptions,
        notifier: BufferNotifier,
    ) -> (Self, VirtualDeviceHandle) {
        let name = name.into();
        let format = options.adjust(&DeviceFormat {
            pixel_format: options.formats.first().copied().unwrap_or(PixelFormat::Rgb24),
            size: Size::new(640, 480),
        });
        let inner = Arc::new(Mutex::new(Inner {
            name: name.clone(),
            options,
            format,
            buffers: Vec::new(),
            queued: VecDeque::new(),
            streaming: false,
            sequence: 0,
            faults: Vec::new(),
            notifier,
            epoch: Instant::now(),
        }));
        let handle = VirtualDeviceHandle {
            inner: Arc::clone(&inner),
        };
        (Self { name, inner }, handle)
    }
}

impl VideoDevice for VirtualVideoDevice {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(device = %self.name))]
    fn set_format(&mut self, format: &DeviceFormat) -> Result<DeviceFormat> {
        let mut inner = lock(&self.inner);
        inner.take_fault(Fault::SetFormat)?;
        if !inner.buffers.is_empty() {
            return Err(Error::device(&self.name, "format is locked while buffers are allocated"));
        }
        let applied = inner.options.adjust(format);
        if applied != *format {
            debug!(?applied, "Format adjusted by device");
        }
        inner.format = applied;
        Ok(applied)
    }

    fn export_buffers(&mut self, count: u32) -> Result<Vec<Bytes>> {
        let mut inner = lock(&self.inner);
        inner.take_fault(Fault::ExportBuffers)?;
        if !inner.buffers.is_empty() {
            return Err(Error::device(&self.name, "buffers already exported"));
        }
        let count = count.min(inner.options.max_buffers);
        let frame_size = inner.format.pixel_format.frame_size(inner.format.size);
        inner.buffers = (0..count).map(|_| Bytes::from(vec![0u8; frame_size])).collect();

        info!(device = %self.name, count, frame_size, "Exported buffers");
        Ok(inner.buffers.clone())
    }

    fn release_buffers(&mut self) -> Result<()> {
        let mut inner = lock(&self.inner);
        inner.take_fault(Fault::ReleaseBuffers)?;
        if inner.streaming {
            return Err(Error::device(&self.name, "cannot release buffers while streaming"));
        }
        inner.buffers.clear();
        inner.queued.clear();
        Ok(())
    }

    fn stream_on(&mut self) -> Result<()> {
        let mut inner = lock(&self.inner);
        inner.take_fault(Fault::StreamOn)?;
        if inner.buffers.is_empty() {
            return Err(Error::device(&self.name, "no buffers exported"));
        }
        inner.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> Result<()> {
        let mut inner = lock(&self.inner);
        // Streaming stops even when the call reports failure
        inner.streaming = false;
        let dropped = inner.queued.len();
        inner.queued.clear();
        if dropped > 0 {
            debug!(device = %self.name, dropped, "Returned queued buffers on stream off");
        }
        inner.take_fault(Fault::StreamOff)
    }

    fn queue_buffer(&mut self, index: usize) -> Result<()> {
        let mut inner = lock(&self.inner);
        inner.take_fault(Fault::QueueBuffer)?;
        if index >= inner.buffers.len() {
            return Err(Error::device(&self.name, format!("no buffer at index {index}")));
        }
        if inner.queued.contains(&index) {
            return Err(Error::device(&self.name, format!("buffer {index} already queued")));
        }
        inner.queued.push_back(index);
        Ok(())
    }
}

/// Control side of a [`VirtualVideoDevice`]
#[derive(Clone)]
pub struct VirtualDeviceHandle {
    inner: Shared,
}

impl VirtualDeviceHandle {
    pub fn name(&self) -> String {
        lock(&self.inner).name.clone()
    }

    /// Fill the oldest queued buffer and post its completion
    pub fn complete_next(&self) -> Option<usize> {
        let mut inner = lock(&self.inner);
        if !inner.streaming {
            return None;
        }
        let index = inner.queued.pop_front()?;
        inner.complete(index);
        Some(index)
    }

    /// Complete every queued buffer, in order
    pub fn complete_all(&self) -> usize {
        let mut count = 0;
        while self.complete_next().is_some() {
            count += 1;
        }
        count
    }

    /// Complete a specific queued buffer, ignoring queue order
    pub fn complete_index(&self, index: usize) -> bool {
        let mut inner = lock(&self.inner);
        if !inner.streaming {
            return false;
        }
        let Some(pos) = inner.queued.iter().position(|i| *i == index) else {
            return false;
        };
        inner.queued.remove(pos);
        inner.complete(index)
    }

    /// Make the next call of `fault` fail
    pub fn inject(&self, fault: Fault) {
        lock(&self.inner).faults.push(fault);
    }

    pub fn queued(&self) -> usize {
        lock(&self.inner).queued.len()
    }

    pub fn exported(&self) -> usize {
        lock(&self.inner).buffers.len()
    }

    pub fn is_streaming(&self) -> bool {
        lock(&self.inner).streaming
    }

    pub fn format(&self) -> DeviceFormat {
        lock(&self.inner).format
    }
}

/// Opens a [`VirtualVideoDevice`] for any entity and keeps its handle
#[derive(Clone, Default)]
pub struct VirtualProvider {
    options: VirtualDeviceOptions,
    handles: Arc<Mutex<HashMap<String, VirtualDeviceHandle>>>,
}

impl VirtualProvider {
    pub fn new(options: VirtualDeviceOptions) -> Self {
        Self {
            options,
            handles: Arc::default(),
        }
    }

    /// Handle of the node opened for `name` (device node path, or entity name)
    pub fn handle(&self, name: &str) -> Option<VirtualDeviceHandle> {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn handles(&self) -> Vec<VirtualDeviceHandle> {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

impl DeviceProvider for VirtualProvider {
    fn open(&self, entity: &Entity, notifier: BufferNotifier) -> Result<Box<dyn VideoDevice>> {
        let name = entity.devnode.clone().unwrap_or_else(|| entity.name.clone());
        let (device, handle) = VirtualVideoDevice::new(name.clone(), self.options.clone(), notifier);
        info!(device = %name, entity = %entity.name, "Opened virtual video node");
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, handle);
        Ok(Box::new(device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::StreamId;
    use crate::pipeline::CameraId;

    fn device() -> (VirtualVideoDevice, VirtualDeviceHandle, flume::Receiver<crate::capture::BufferReady>) {
        let (tx, rx) = flume::unbounded();
        let notifier = BufferNotifier::new(CameraId::next(), StreamId::next(), tx);
        let (dev, handle) = VirtualVideoDevice::new("/dev/video1", VirtualDeviceOptions::default(), notifier);
        (dev, handle, rx)
    }

    #[test]
    fn format_is_adjusted_not_rejected() {
        let (mut dev, _, _) = device();
        let applied = dev
            .set_format(&DeviceFormat {
                pixel_format: PixelFormat::Mjpeg,
                size: Size::new(641, 9000),
            })
            .unwrap();
        assert_eq!(applied.pixel_format, PixelFormat::Rgb24);
        assert_eq!(applied.size, Size::new(640, 2160));
    }

    #[test]
    fn completes_in_queue_order() {
        let (mut dev, handle, rx) = device();
        dev.export_buffers(4).unwrap();
        dev.stream_on().unwrap();
        for i in [2, 0, 3] {
            dev.queue_buffer(i).unwrap();
        }

        assert_eq!(handle.complete_all(), 3);
        let order: Vec<_> = rx.try_iter().map(|ev| ev.index).collect();
        assert_eq!(order, [2, 0, 3]);
    }

    #[test]
    fn nothing_completes_after_stream_off() {
        let (mut dev, handle, rx) = device();
        dev.export_buffers(2).unwrap();
        dev.stream_on().unwrap();
        dev.queue_buffer(0).unwrap();
        dev.stream_off().unwrap();

        assert_eq!(handle.complete_next(), None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn injected_fault_fires_once() {
        let (mut dev, handle, _) = device();
        dev.export_buffers(2).unwrap();
        handle.inject(Fault::StreamOn);
        assert!(dev.stream_on().is_err());
        dev.stream_on().unwrap();
        assert!(handle.is_streaming());
    }
}
