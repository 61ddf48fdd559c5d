//! Pipeline handler for the vimc virtual media controller topology

use std::sync::Arc;

use bytes::Bytes;
use flume::Sender;
use tracing::{debug, error, info};

use crate::capture::{
    BufferNotifier, BufferReady, CameraConfiguration, DeviceFormat, DeviceProvider, Stream,
    StreamConfiguration, StreamId, StreamRole, VideoDevice,
};
use crate::error::{Error, Result};
use crate::media::{DeviceEnumerator, DeviceMatch, Entity, MediaDevice, PadFlags};
use crate::Config;

use super::camera::CameraId;
use super::handler::{CameraData, CameraPipeline, Pipeline, PipelineHandler};
use super::request::Request;

const DRIVER: &str = "vimc";
const CAPTURE_ENTITY: &str = "Raw Capture 1";
const CAMERA_NAME: &str = "VIMC Sensor B";

const ENTITIES: [&str; 9] = [
    "Raw Capture 0",
    "Raw Capture 1",
    "RGB/YUV Capture",
    "Sensor A",
    "Sensor B",
    "Debayer A",
    "Debayer B",
    "RGB/YUV Input",
    "Scaler",
];

/// The media graph the vimc kernel driver exposes. `instance` offsets the
/// video node numbers.
pub fn vimc_topology(instance: u32) -> MediaDevice {
    let node = |n: u32| format!("/dev/video{}", instance * 4 + n);
    MediaDevice::new(DRIVER, format!("VIMC MDEV {instance}"))
        .with_entity(Entity::new("Sensor A", PadFlags::SOURCE))
        .with_entity(Entity::new("Sensor B", PadFlags::SOURCE))
        .with_entity(Entity::new("Debayer A", PadFlags::BOTH))
        .with_entity(Entity::new("Debayer B", PadFlags::BOTH))
        .with_entity(Entity::new("Raw Capture 0", PadFlags::SINK).with_devnode(node(0)))
        .with_entity(Entity::new("Raw Capture 1", PadFlags::SINK).with_devnode(node(1)))
        .with_entity(Entity::new("RGB/YUV Input", PadFlags::SOURCE).with_devnode(node(2)))
        .with_entity(Entity::new("Scaler", PadFlags::BOTH))
        .with_entity(Entity::new("RGB/YUV Capture", PadFlags::SINK).with_devnode(node(3)))
}

/// Per-camera state: the capture node and the single stream it feeds
pub struct VimcCameraData {
    video: Box<dyn VideoDevice>,
    stream: StreamId,
}

pub struct VimcHandler {
    provider: Arc<dyn DeviceProvider>,
    defaults: StreamConfiguration,
}

impl VimcHandler {
    pub fn new(provider: Arc<dyn DeviceProvider>, defaults: StreamConfiguration) -> Self {
        Self { provider, defaults }
    }

    /// Registry factory
    pub fn create(config: &Config, provider: Arc<dyn DeviceProvider>) -> Box<dyn CameraPipeline> {
        Box::new(Pipeline::new(Self::new(provider, config.capture.stream_defaults())))
    }

    fn device_match() -> DeviceMatch {
        let mut dm = DeviceMatch::new(DRIVER);
        for name in ENTITIES {
            dm.add(name);
        }
        dm
    }
}

impl PipelineHandler for VimcHandler {
    type Data = VimcCameraData;

    fn name(&self) -> &'static str {
        DRIVER
    }

    fn match_devices(
        &mut self,
        enumerator: &DeviceEnumerator,
        events: &Sender<BufferReady>,
    ) -> Result<Vec<CameraData<VimcCameraData>>> {
        let Some(media) = enumerator.search(&Self::device_match()) else {
            return Ok(Vec::new());
        };

        // Locate and open the capture video node
        let entity = media
            .entity(CAPTURE_ENTITY)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("entity {CAPTURE_ENTITY}")))?;
        let id = CameraId::next();
        let stream = Stream::new();
        let stream_id = stream.id();
        let notifier = BufferNotifier::new(id, stream_id, events.clone());
        let video = self.provider.open(&entity, notifier).map_err(|e| {
            error!(entity = %entity.name, error = %e, "Failed to open capture node");
            e
        })?;
        info!(model = %media.device().model, node = video.name(), "Matched vimc media device");

        let data = VimcCameraData {
            video,
            stream: stream_id,
        };
        Ok(vec![CameraData::new(id, CAMERA_NAME, media, vec![stream], data)])
    }

    fn generate_configuration(
        &self,
        camera: &CameraData<VimcCameraData>,
        roles: &[StreamRole],
    ) -> CameraConfiguration {
        let mut config = CameraConfiguration::new();
        if let Some(role) = roles.first() {
            if roles.len() > 1 {
                debug!(requested = roles.len(), "vimc exposes a single stream, extra roles ignored");
            }
            debug!(?role, config = %self.defaults, "Generated default configuration");
            config.insert(camera.data.stream, self.defaults);
        }
        config
    }

    fn configure(
        &mut self,
        camera: &mut CameraData<VimcCameraData>,
        config: &CameraConfiguration,
    ) -> Result<CameraConfiguration> {
        let stream = camera.data.stream;
        let cfg = config
            .get(stream)
            .ok_or_else(|| Error::InvalidConfiguration(format!("{stream} missing from configuration")))?;

        let applied = camera.data.video.set_format(&DeviceFormat {
            pixel_format: cfg.pixel_format,
            size: cfg.size,
        })?;

        let mut out = CameraConfiguration::new();
        out.insert(
            stream,
            StreamConfiguration {
                pixel_format: applied.pixel_format,
                size: applied.size,
                buffer_count: cfg.buffer_count,
            },
        );
        Ok(out)
    }

    fn allocate_buffers(
        &mut self,
        camera: &mut CameraData<VimcCameraData>,
        _stream: StreamId,
        count: u32,
    ) -> Result<Vec<Bytes>> {
        debug!(count, "Requesting buffers");
        camera.data.video.export_buffers(count)
    }

    fn free_buffers(&mut self, camera: &mut CameraData<VimcCameraData>, _stream: StreamId) -> Result<()> {
        camera.data.video.release_buffers()
    }

    fn start(&mut self, camera: &mut CameraData<VimcCameraData>) -> Result<()> {
        camera.data.video.stream_on()
    }

    fn stop(&mut self, camera: &mut CameraData<VimcCameraData>) -> Result<()> {
        camera.data.video.stream_off()
    }

    fn queue_request(&mut self, camera: &mut CameraData<VimcCameraData>, request: &Request) -> Result<()> {
        let stream = camera.data.stream;
        let Some(index) = request.find_buffer(stream) else {
            error!("Attempt to queue request with invalid stream");
            return Err(Error::NotFound(format!("{stream} in request {}", request.cookie())));
        };
        camera.data.video.queue_buffer(index)
    }
}
