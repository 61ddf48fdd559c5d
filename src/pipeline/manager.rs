//! Single-threaded reactor that owns every pipeline and camera
//!
//! Hardware completions arrive on one channel and are correlated on the
//! thread that owns the manager, so pipeline state is never touched
//! concurrently. Completions for the application leave on a second channel.

use std::collections::HashMap;
use std::sync::Arc;

use flume::{Receiver, Sender};
use tracing::{debug, error, info, instrument, warn};

use crate::capture::{
    BufferReady, CameraConfiguration, DeviceProvider, StreamConfiguration, StreamId, StreamRole,
};
use crate::error::{Error, Result};
use crate::media::DeviceEnumerator;
use crate::Config;

use super::camera::{Camera, CameraId, CameraState};
use super::handler::CameraPipeline;
use super::registry::PipelineRegistry;
use super::request::{Completion, Request};

pub struct CameraManager {
    pipelines: Vec<Box<dyn CameraPipeline>>,
    cameras: Vec<Camera>,
    owners: HashMap<CameraId, usize>,
    events_tx: Sender<BufferReady>,
    events_rx: Receiver<BufferReady>,
    completions_tx: Sender<Completion>,
    completions_rx: Receiver<Completion>,
}

impl Default for CameraManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraManager {
    pub fn new() -> Self {
        let (events_tx, events_rx) = flume::unbounded();
        let (completions_tx, completions_rx) = flume::unbounded();
        Self {
            pipelines: Vec::new(),
            cameras: Vec::new(),
            owners: HashMap::new(),
            events_tx,
            events_rx,
            completions_tx,
            completions_rx,
        }
    }

    /// Channel the application reads completions from
    pub fn completions(&self) -> Receiver<Completion> {
        self.completions_rx.clone()
    }

    /// Channel hardware collaborators post completions to
    pub fn events(&self) -> Sender<BufferReady> {
        self.events_tx.clone()
    }

    /// Instantiate every enabled handler and let each match as many graphs as
    /// it can. Handlers that match nothing are dropped. Returns the number of
    /// cameras registered.
    #[instrument(skip_all)]
    pub fn discover(
        &mut self,
        registry: &PipelineRegistry,
        enumerator: &DeviceEnumerator,
        config: &Config,
        provider: Arc<dyn DeviceProvider>,
    ) -> usize {
        let mut found = 0;
        for pipeline in registry.instantiate(config, provider) {
            found += self.add_pipeline(pipeline, enumerator);
        }
        info!(cameras = self.cameras.len(), "Camera discovery complete");
        found
    }

    /// Match one pipeline until it stops claiming graphs. Returns the number
    /// of cameras it registered.
    ///
    /// A failed match ends the loop for this pipeline only; cameras it
    /// registered before the failure are kept.
    pub fn add_pipeline(
        &mut self,
        mut pipeline: Box<dyn CameraPipeline>,
        enumerator: &DeviceEnumerator,
    ) -> usize {
        let mut registered = Vec::new();
        loop {
            match pipeline.match_devices(enumerator, &self.events_tx) {
                Ok(cameras) if cameras.is_empty() => break,
                Ok(cameras) => registered.extend(cameras),
                Err(e) => {
                    error!(
                        pipeline = pipeline.name(),
                        registered = registered.len(),
                        error = %e,
                        "Failed to match media device"
                    );
                    break;
                }
            }
        }
        if registered.is_empty() {
            debug!(pipeline = pipeline.name(), "Pipeline handler matched no device");
            return 0;
        }

        let index = self.pipelines.len();
        self.pipelines.push(pipeline);
        let count = registered.len();
        for camera in registered {
            self.owners.insert(camera.id, index);
            self.cameras.push(camera);
        }
        count
    }

    pub fn cameras(&self) -> &[Camera] {
        &self.cameras
    }

    pub fn get(&self, name: &str) -> Option<&Camera> {
        self.cameras.iter().find(|c| c.name == name)
    }

    fn pipeline(&self, camera: &Camera) -> Result<&dyn CameraPipeline> {
        let index = self
            .owners
            .get(&camera.id)
            .ok_or_else(|| Error::NotFound(camera.id.to_string()))?;
        Ok(self.pipelines[*index].as_ref())
    }

    fn pipeline_mut(&mut self, camera: CameraId) -> Result<&mut Box<dyn CameraPipeline>> {
        let index = *self
            .owners
            .get(&camera)
            .ok_or_else(|| Error::NotFound(camera.to_string()))?;
        Ok(&mut self.pipelines[index])
    }

    pub fn generate_configuration(
        &self,
        camera: &Camera,
        roles: &[StreamRole],
    ) -> Result<CameraConfiguration> {
        self.pipeline(camera)?.generate_configuration(camera.id, roles)
    }

    pub fn configure(&mut self, camera: &Camera, config: &CameraConfiguration) -> Result<()> {
        self.pipeline_mut(camera.id)?.configure(camera.id, config)
    }

    pub fn allocate_buffers(&mut self, camera: &Camera, streams: &[StreamId]) -> Result<()> {
        self.pipeline_mut(camera.id)?.allocate_buffers(camera.id, streams)
    }

    pub fn free_buffers(&mut self, camera: &Camera, streams: &[StreamId]) -> Result<()> {
        self.pipeline_mut(camera.id)?.free_buffers(camera.id, streams)
    }

    pub fn start(&mut self, camera: &Camera) -> Result<()> {
        self.pipeline_mut(camera.id)?.start(camera.id)
    }

    /// Stop streaming and flush the camera's in-flight requests.
    ///
    /// Completions posted before the hardware stopped are correlated first;
    /// whatever is still in flight afterwards is delivered as cancelled. The
    /// camera always ends up `Allocated`; a hardware error is still returned.
    pub fn stop(&mut self, camera: &Camera) -> Result<()> {
        let result = self.pipeline_mut(camera.id)?.stream_off(camera.id);
        self.dispatch_pending();
        let cancelled = self.pipeline_mut(camera.id)?.flush(camera.id);
        self.deliver(cancelled);
        result
    }

    /// Submit a request. Returns immediately; completion arrives later on
    /// the completion channel.
    pub fn queue_request(&mut self, camera: &Camera, request: Request) -> Result<()> {
        self.pipeline_mut(camera.id)?.queue_request(camera.id, request)
    }

    /// Stop and destroy a camera. Its media graph becomes acquirable again.
    ///
    /// In-flight requests are always delivered as cancelled; a hardware
    /// error during shutdown is returned afterwards.
    pub fn remove_camera(&mut self, camera: &Camera) -> Result<()> {
        self.dispatch_pending();
        let (cancelled, result) = self.pipeline_mut(camera.id)?.unregister(camera.id);
        self.owners.remove(&camera.id);
        self.cameras.retain(|c| c.id != camera.id);
        self.deliver(cancelled);
        if let Err(e) = &result {
            warn!(camera = %camera.id, error = %e, "Camera removed with hardware errors");
        }
        result
    }

    pub fn state(&self, camera: &Camera) -> Option<CameraState> {
        self.pipeline(camera).ok()?.state(camera.id)
    }

    pub fn in_flight(&self, camera: &Camera) -> Option<usize> {
        self.pipeline(camera).ok()?.in_flight(camera.id)
    }

    pub fn in_flight_requests(&self, camera: &Camera) -> Option<Vec<Request>> {
        self.pipeline(camera).ok()?.in_flight_requests(camera.id)
    }

    pub fn stream_configuration(&self, camera: &Camera, stream: StreamId) -> Option<StreamConfiguration> {
        self.pipeline(camera).ok()?.stream_configuration(camera.id, stream)
    }

    pub fn pool_len(&self, camera: &Camera, stream: StreamId) -> Option<usize> {
        self.pipeline(camera).ok()?.pool_len(camera.id, stream)
    }

    /// Correlate one hardware completion and forward the results.
    ///
    /// A completion that cannot be correlated means the hardware broke its
    /// ordering contract; it is logged and dropped.
    pub fn dispatch(&mut self, event: BufferReady) {
        let completions = match self
            .pipeline_mut(event.camera)
            .and_then(|pipeline| pipeline.buffer_ready(event))
        {
            Ok(completions) => completions,
            Err(e) => {
                error!(
                    camera = %event.camera,
                    stream = %event.stream,
                    index = event.index,
                    error = %e,
                    "Dropping uncorrelated buffer completion"
                );
                metrics::counter!("camgraph_events_dropped_total").increment(1);
                return;
            }
        };
        self.deliver(completions);
    }

    /// Dispatch every completion already posted. Returns how many were handled.
    pub fn dispatch_pending(&mut self) -> usize {
        let mut count = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.dispatch(event);
            count += 1;
        }
        count
    }

    /// Wait for the next hardware completion and dispatch it
    pub async fn dispatch_next(&mut self) -> Result<()> {
        let event = self
            .events_rx
            .recv_async()
            .await
            .map_err(|e| Error::ProtocolViolation(format!("event channel closed: {e}")))?;
        self.dispatch(event);
        Ok(())
    }

    fn deliver(&self, completions: Vec<Completion>) {
        for completion in completions {
            if self.completions_tx.send(completion).is_err() {
                warn!("Completion receiver dropped");
                return;
            }
        }
    }
}
