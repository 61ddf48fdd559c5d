//! Pipeline handler contract and the common camera lifecycle
//!
//! A hardware family implements [`PipelineHandler`]: matching its media
//! graph and the device-specific half of each lifecycle step. [`Pipeline`]
//! wraps a handler, owns the per-camera state of every camera it registered,
//! enforces the state machine
//!
//! ```text
//! Unconfigured -> Configured -> Allocated -> Streaming
//!                      ^            |  ^          |
//!                      +-- free ----+  +-- stop --+
//! ```
//!
//! and correlates buffer completions to requests. The object-safe
//! [`CameraPipeline`] trait is what the camera manager holds.

use std::collections::BTreeMap;

use bytes::Bytes;
use flume::Sender;
use tracing::{debug, error, info, instrument, warn};

use crate::capture::{
    BufferReady, CameraConfiguration, Stream, StreamConfiguration, StreamId, StreamRole,
};
use crate::error::{Error, Result};
use crate::media::{BoundHardware, DeviceEnumerator};

use super::camera::{Camera, CameraId, CameraState};
use super::correlator::InFlightQueue;
use super::request::{Completion, Request, RequestStatus};

/// Per-camera state owned by the pipeline that registered the camera.
///
/// `D` is the handler's own per-camera data (opened devices and the like).
/// Dropping a `CameraData` closes those devices and releases the media graph.
pub struct CameraData<D> {
    id: CameraId,
    name: String,
    hardware: BoundHardware,
    streams: BTreeMap<StreamId, Stream>,
    state: CameraState,
    queue: InFlightQueue,
    pub data: D,
}

impl<D> CameraData<D> {
    pub fn new(
        id: CameraId,
        name: impl Into<String>,
        hardware: BoundHardware,
        streams: Vec<Stream>,
        data: D,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            hardware,
            streams: streams.into_iter().map(|s| (s.id(), s)).collect(),
            state: CameraState::Unconfigured,
            queue: InFlightQueue::new(),
            data,
        }
    }

    pub fn id(&self) -> CameraId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hardware(&self) -> &BoundHardware {
        &self.hardware
    }

    pub fn state(&self) -> CameraState {
        self.state
    }

    pub fn stream(&self, id: StreamId) -> Option<&Stream> {
        self.streams.get(&id)
    }

    pub fn streams(&self) -> impl Iterator<Item = &Stream> {
        self.streams.values()
    }

    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.streams.keys().copied().collect()
    }

    pub fn in_flight(&self) -> &InFlightQueue {
        &self.queue
    }

    fn require(&self, operation: &'static str, allowed: &[CameraState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState {
                camera: self.id,
                state: self.state,
                operation,
            })
        }
    }

    fn stream_mut(&mut self, id: StreamId) -> Result<&mut Stream> {
        let camera = self.id;
        self.streams
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("{id} on {camera}")))
    }

    fn owns(&self, id: StreamId) -> Result<()> {
        if self.streams.contains_key(&id) {
            Ok(())
        } else {
            Err(Error::NotFound(format!("{id} on {}", self.id)))
        }
    }

    fn handle(&self, pipeline: &str) -> Camera {
        Camera {
            id: self.id,
            name: self.name.clone(),
            pipeline: pipeline.to_string(),
            streams: self.stream_ids(),
        }
    }
}

/// Device-specific half of a pipeline handler.
///
/// The framework has already validated state and stream ownership before any
/// of the lifecycle hooks run.
pub trait PipelineHandler: Send + 'static {
    type Data: Send + 'static;

    fn name(&self) -> &'static str;

    /// Try to acquire one matching media graph and build the cameras it backs.
    ///
    /// An empty result means the handler does not apply to any remaining
    /// graph. Completions for the cameras' streams are posted on `events`.
    fn match_devices(
        &mut self,
        enumerator: &DeviceEnumerator,
        events: &Sender<BufferReady>,
    ) -> Result<Vec<CameraData<Self::Data>>>;

    /// Default configuration for the requested roles, without touching hardware
    fn generate_configuration(
        &self,
        camera: &CameraData<Self::Data>,
        roles: &[StreamRole],
    ) -> CameraConfiguration;

    /// Program the hardware and return the configuration it actually applied
    fn configure(
        &mut self,
        camera: &mut CameraData<Self::Data>,
        config: &CameraConfiguration,
    ) -> Result<CameraConfiguration>;

    /// Export `count` buffers for `stream`
    fn allocate_buffers(
        &mut self,
        camera: &mut CameraData<Self::Data>,
        stream: StreamId,
        count: u32,
    ) -> Result<Vec<Bytes>>;

    fn free_buffers(&mut self, camera: &mut CameraData<Self::Data>, stream: StreamId) -> Result<()>;

    fn start(&mut self, camera: &mut CameraData<Self::Data>) -> Result<()>;

    /// Stop the hardware. No completion may be posted once this returns.
    fn stop(&mut self, camera: &mut CameraData<Self::Data>) -> Result<()>;

    /// Hand every buffer of `request` to the hardware
    fn queue_request(&mut self, camera: &mut CameraData<Self::Data>, request: &Request) -> Result<()>;
}

/// Object-safe view of a [`Pipeline`], held by the camera manager
pub trait CameraPipeline: Send {
    fn name(&self) -> &str;

    /// Run the handler's matching once; returns the cameras registered
    fn match_devices(
        &mut self,
        enumerator: &DeviceEnumerator,
        events: &Sender<BufferReady>,
    ) -> Result<Vec<Camera>>;

    fn cameras(&self) -> Vec<Camera>;

    fn generate_configuration(
        &self,
        camera: CameraId,
        roles: &[StreamRole],
    ) -> Result<CameraConfiguration>;

    fn configure(&mut self, camera: CameraId, config: &CameraConfiguration) -> Result<()>;

    fn allocate_buffers(&mut self, camera: CameraId, streams: &[StreamId]) -> Result<()>;

    fn free_buffers(&mut self, camera: CameraId, streams: &[StreamId]) -> Result<()>;

    fn start(&mut self, camera: CameraId) -> Result<()>;

    /// Stop the hardware and return to `Allocated`, even if the hardware
    /// reports an error. In-flight requests stay queued until [`flush`].
    ///
    /// [`flush`]: CameraPipeline::flush
    fn stream_off(&mut self, camera: CameraId) -> Result<()>;

    /// Cancel every request still in flight
    fn flush(&mut self, camera: CameraId) -> Vec<Completion>;

    fn queue_request(&mut self, camera: CameraId, request: Request) -> Result<()>;

    /// Correlate one hardware completion
    fn buffer_ready(&mut self, event: BufferReady) -> Result<Vec<Completion>>;

    /// Stop, free and destroy the camera's state.
    ///
    /// Requests still in flight are returned cancelled even when the
    /// hardware reports an error while shutting down.
    fn unregister(&mut self, camera: CameraId) -> (Vec<Completion>, Result<()>);

    fn state(&self, camera: CameraId) -> Option<CameraState>;

    fn in_flight(&self, camera: CameraId) -> Option<usize>;

    /// Snapshot of the in-flight requests, oldest first
    fn in_flight_requests(&self, camera: CameraId) -> Option<Vec<Request>>;

    fn stream_configuration(&self, camera: CameraId, stream: StreamId) -> Option<StreamConfiguration>;

    fn pool_len(&self, camera: CameraId, stream: StreamId) -> Option<usize>;
}

/// A handler plus the arena of per-camera state it owns
pub struct Pipeline<H: PipelineHandler> {
    handler: H,
    cameras: BTreeMap<CameraId, CameraData<H::Data>>,
}

impl<H: PipelineHandler> Pipeline<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            cameras: BTreeMap::new(),
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn camera(&self, id: CameraId) -> Option<&CameraData<H::Data>> {
        self.cameras.get(&id)
    }

    /// Take ownership of a camera's state and return its application handle
    pub fn register_camera(&mut self, data: CameraData<H::Data>) -> Camera {
        let camera = data.handle(self.handler.name());
        info!(
            pipeline = self.handler.name(),
            camera = %camera.id,
            name = %camera.name,
            streams = camera.streams.len(),
            "Registered camera"
        );
        self.cameras.insert(data.id, data);
        camera
    }

    /// Split borrow of the handler and one camera's state
    fn parts(&mut self, id: CameraId) -> Result<(&mut H, &mut CameraData<H::Data>)> {
        let Self { handler, cameras } = self;
        let camera = cameras
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        Ok((handler, camera))
    }

    fn release_pools(
        handler: &mut H,
        camera: &mut CameraData<H::Data>,
        streams: &[StreamId],
    ) -> Result<()> {
        for &stream in streams {
            if camera.stream(stream).is_some_and(|s| s.pool().is_empty()) {
                continue;
            }
            handler.free_buffers(camera, stream)?;
            camera.stream_mut(stream)?.pool_mut().clear();
            debug!(camera = %camera.id, %stream, "Released buffer pool");
        }
        if camera.streams().all(|s| s.pool().is_empty()) {
            camera.state = CameraState::Configured;
        }
        Ok(())
    }
}

impl<H: PipelineHandler> CameraPipeline for Pipeline<H> {
    fn name(&self) -> &str {
        self.handler.name()
    }

    fn match_devices(
        &mut self,
        enumerator: &DeviceEnumerator,
        events: &Sender<BufferReady>,
    ) -> Result<Vec<Camera>> {
        let found = self.handler.match_devices(enumerator, events)?;
        Ok(found
            .into_iter()
            .map(|data| self.register_camera(data))
            .collect())
    }

    fn cameras(&self) -> Vec<Camera> {
        let name = self.handler.name();
        self.cameras.values().map(|c| c.handle(name)).collect()
    }

    fn generate_configuration(
        &self,
        camera: CameraId,
        roles: &[StreamRole],
    ) -> Result<CameraConfiguration> {
        let data = self
            .cameras
            .get(&camera)
            .ok_or_else(|| Error::NotFound(camera.to_string()))?;
        Ok(self.handler.generate_configuration(data, roles))
    }

    #[instrument(skip(self, config), fields(pipeline = self.handler.name()))]
    fn configure(&mut self, camera: CameraId, config: &CameraConfiguration) -> Result<()> {
        let (handler, data) = self.parts(camera)?;
        data.require("configure", &[CameraState::Unconfigured, CameraState::Configured])?;

        if config.is_empty() {
            return Err(Error::InvalidConfiguration("no streams to configure".into()));
        }
        for (stream, cfg) in config.iter() {
            data.owns(stream)?;
            if cfg.buffer_count == 0 {
                return Err(Error::InvalidConfiguration(format!(
                    "{stream}: buffer count must be positive"
                )));
            }
        }

        let applied = handler.configure(data, config)?;
        for (stream, requested) in config.iter() {
            let Some(actual) = applied.get(stream) else {
                return Err(Error::InvalidConfiguration(format!(
                    "{stream} was not configured by the handler"
                )));
            };
            if !requested.same_format(actual) {
                warn!(%stream, %requested, applied = %actual, "Hardware altered configuration");
                return Err(Error::Invalid {
                    stream,
                    requested: *requested,
                    applied: *actual,
                });
            }
        }

        for (stream, requested) in config.iter() {
            data.stream_mut(stream)?.set_configuration(*requested);
            info!(camera = %camera, %stream, config = %requested, buffers = requested.buffer_count, "Stream configured");
        }
        data.state = CameraState::Configured;
        Ok(())
    }

    #[instrument(skip(self, streams), fields(pipeline = self.handler.name()))]
    fn allocate_buffers(&mut self, camera: CameraId, streams: &[StreamId]) -> Result<()> {
        let (handler, data) = self.parts(camera)?;
        data.require("allocate buffers", &[CameraState::Configured, CameraState::Allocated])?;
        if streams.is_empty() {
            return Err(Error::InvalidConfiguration("no streams to allocate".into()));
        }

        let mut counts = Vec::with_capacity(streams.len());
        for &stream in streams {
            data.owns(stream)?;
            let Some(s) = data.stream(stream) else { continue };
            let Some(cfg) = s.configuration() else {
                return Err(Error::InvalidConfiguration(format!("{stream} is not configured")));
            };
            if !s.pool().is_empty() {
                return Err(Error::InvalidState {
                    camera,
                    state: data.state,
                    operation: "allocate buffers twice",
                });
            }
            counts.push((stream, cfg.buffer_count));
        }

        let mut done = Vec::with_capacity(counts.len());
        for (stream, count) in counts {
            let exported = match handler.allocate_buffers(data, stream, count) {
                Ok(memory) if memory.len() == count as usize => memory,
                Ok(memory) => {
                    let got = memory.len();
                    if let Err(e) = handler.free_buffers(data, stream) {
                        warn!(%stream, error = %e, "Failed to release short allocation");
                    }
                    Self::rollback(handler, data, &done);
                    return Err(Error::device(
                        data.name(),
                        format!("{stream}: requested {count} buffers, got {got}"),
                    ));
                }
                Err(e) => {
                    Self::rollback(handler, data, &done);
                    return Err(e);
                }
            };
            data.stream_mut(stream)?.pool_mut().populate(exported)?;
            debug!(camera = %camera, %stream, count, "Allocated buffer pool");
            done.push(stream);
        }

        data.state = CameraState::Allocated;
        Ok(())
    }

    #[instrument(skip(self, streams), fields(pipeline = self.handler.name()))]
    fn free_buffers(&mut self, camera: CameraId, streams: &[StreamId]) -> Result<()> {
        let (handler, data) = self.parts(camera)?;
        match data.state {
            CameraState::Unconfigured | CameraState::Configured => {
                debug!(camera = %camera, "No buffers to free");
                return Ok(());
            }
            CameraState::Streaming => data.require("free buffers", &[CameraState::Allocated])?,
            CameraState::Allocated => {}
        }
        for &stream in streams {
            data.owns(stream)?;
        }
        Self::release_pools(handler, data, streams)
    }

    #[instrument(skip(self), fields(pipeline = self.handler.name()))]
    fn start(&mut self, camera: CameraId) -> Result<()> {
        let (handler, data) = self.parts(camera)?;
        data.require("start", &[CameraState::Allocated])?;
        if let Some(missing) = data
            .streams()
            .find(|s| s.configuration().is_some() && s.pool().is_empty())
        {
            debug!(stream = %missing.id(), "Stream has no buffers");
            return Err(Error::InvalidState {
                camera,
                state: data.state,
                operation: "start with unallocated streams",
            });
        }

        handler.start(data)?;
        data.state = CameraState::Streaming;
        info!(camera = %camera, "Streaming started");
        Ok(())
    }

    #[instrument(skip(self), fields(pipeline = self.handler.name()))]
    fn stream_off(&mut self, camera: CameraId) -> Result<()> {
        let (handler, data) = self.parts(camera)?;
        if data.state != CameraState::Streaming {
            return Ok(());
        }
        let result = handler.stop(data);
        if let Err(e) = &result {
            error!(camera = %camera, error = %e, "Hardware stop failed, continuing cleanup");
        }
        data.state = CameraState::Allocated;
        info!(camera = %camera, in_flight = data.queue.len(), "Streaming stopped");
        result
    }

    fn flush(&mut self, camera: CameraId) -> Vec<Completion> {
        let Some(data) = self.cameras.get_mut(&camera) else {
            return Vec::new();
        };
        let cancelled = data.queue.cancel_all();
        if !cancelled.is_empty() {
            info!(camera = %camera, count = cancelled.len(), "Cancelled in-flight requests");
            metrics::counter!("camgraph_requests_cancelled_total").increment(cancelled.len() as u64);
        }
        for request in &cancelled {
            for (stream, index) in request.buffers() {
                if let Some(s) = data.streams.get_mut(&stream) {
                    s.pool_mut().cancel(index);
                }
            }
        }
        cancelled
            .into_iter()
            .map(|request| Completion::RequestComplete { camera, request })
            .collect()
    }

    fn queue_request(&mut self, camera: CameraId, request: Request) -> Result<()> {
        let (handler, data) = self.parts(camera)?;
        data.require("queue request", &[CameraState::Streaming])?;
        if request.is_empty() {
            return Err(Error::ProtocolViolation(format!(
                "request {} has no buffers",
                request.cookie()
            )));
        }
        if request.status() != RequestStatus::Pending {
            return Err(Error::ProtocolViolation(format!(
                "request {} was already completed, reuse it first",
                request.cookie()
            )));
        }
        for (stream, index) in request.buffers() {
            let Some(s) = data.stream(stream) else {
                error!(camera = %camera, %stream, "Attempt to queue request with invalid stream");
                return Err(Error::NotFound(format!("{stream} on {camera}")));
            };
            s.pool().ensure_available(index)?;
        }

        handler.queue_request(data, &request)?;

        for (stream, index) in request.buffers() {
            data.stream_mut(stream)?.pool_mut().mark_queued(index)?;
        }
        debug!(camera = %camera, request = request.cookie(), in_flight = data.queue.len() + 1, "Request queued");
        data.queue.push(request);
        Ok(())
    }

    fn buffer_ready(&mut self, event: BufferReady) -> Result<Vec<Completion>> {
        let camera = event.camera;
        let (_, data) = self.parts(camera)?;
        if data.stream(event.stream).is_none() {
            return Err(Error::ProtocolViolation(format!(
                "completion for {} which {camera} does not own",
                event.stream
            )));
        }

        let correlation = data.queue.correlate(event.stream, event.index, event.metadata)?;
        data.stream_mut(event.stream)?
            .pool_mut()
            .complete(correlation.index, event.metadata);
        metrics::counter!("camgraph_buffers_completed_total").increment(1);

        let mut out = Vec::with_capacity(1 + correlation.completed.len());
        out.push(Completion::BufferComplete {
            camera,
            request: correlation.request,
            stream: event.stream,
            index: correlation.index,
            metadata: event.metadata,
        });
        for request in correlation.completed {
            debug!(camera = %camera, request = request.cookie(), "Request complete");
            metrics::counter!("camgraph_requests_completed_total").increment(1);
            out.push(Completion::RequestComplete { camera, request });
        }
        Ok(out)
    }

    fn unregister(&mut self, camera: CameraId) -> (Vec<Completion>, Result<()>) {
        let stop = self.stream_off(camera);
        let cancelled = self.flush(camera);
        let freed = match self.parts(camera) {
            Ok((handler, data)) if data.state == CameraState::Allocated => {
                let streams = data.stream_ids();
                Self::release_pools(handler, data, &streams)
            }
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        };
        if let Some(data) = self.cameras.remove(&camera) {
            info!(camera = %camera, name = %data.name, "Unregistered camera");
        }
        (cancelled, stop.and(freed))
    }

    fn state(&self, camera: CameraId) -> Option<CameraState> {
        self.cameras.get(&camera).map(|c| c.state)
    }

    fn in_flight(&self, camera: CameraId) -> Option<usize> {
        self.cameras.get(&camera).map(|c| c.queue.len())
    }

    fn in_flight_requests(&self, camera: CameraId) -> Option<Vec<Request>> {
        self.cameras
            .get(&camera)
            .map(|c| c.queue.iter().cloned().collect())
    }

    fn stream_configuration(&self, camera: CameraId, stream: StreamId) -> Option<StreamConfiguration> {
        self.cameras
            .get(&camera)?
            .stream(stream)?
            .configuration()
            .copied()
    }

    fn pool_len(&self, camera: CameraId, stream: StreamId) -> Option<usize> {
        Some(self.cameras.get(&camera)?.stream(stream)?.pool().len())
    }
}

impl<H: PipelineHandler> Pipeline<H> {
    fn rollback(handler: &mut H, camera: &mut CameraData<H::Data>, streams: &[StreamId]) {
        for &stream in streams {
            if let Err(e) = handler.free_buffers(camera, stream) {
                warn!(%stream, error = %e, "Failed to roll back allocation");
            }
            if let Some(s) = camera.streams.get_mut(&stream) {
                s.pool_mut().clear();
            }
        }
    }
}
