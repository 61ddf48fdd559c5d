#![allow(dead_code)]

use std::sync::Arc;

use camgraph::capture::{
    DeviceProvider, StreamConfiguration, StreamId, StreamRole, VirtualDeviceHandle, VirtualDeviceOptions,
    VirtualProvider,
};
use camgraph::media::DeviceEnumerator;
use camgraph::pipeline::{vimc_topology, Camera, CameraManager, Completion, PipelineRegistry, Request, RequestStatus};
use camgraph::Config;

/// A manager with every vimc graph discovered over virtual capture nodes
pub struct Rig {
    pub manager: CameraManager,
    pub provider: VirtualProvider,
    pub enumerator: DeviceEnumerator,
    pub cameras: Vec<Camera>,
}

impl Rig {
    pub fn vimc(graphs: u32) -> Self {
        Self::vimc_with(graphs, VirtualDeviceOptions::default())
    }

    pub fn vimc_with(graphs: u32, options: VirtualDeviceOptions) -> Self {
        let mut enumerator = DeviceEnumerator::new();
        for instance in 0..graphs {
            enumerator.add_device(vimc_topology(instance));
        }
        let provider = VirtualProvider::new(options);
        let shared: Arc<dyn DeviceProvider> = Arc::new(provider.clone());
        let mut manager = CameraManager::new();
        manager
            .discover(&PipelineRegistry::with_defaults(), &enumerator, &Config::default(), shared);
        let cameras = manager.cameras().to_vec();
        Self {
            manager,
            provider,
            enumerator,
            cameras,
        }
    }

    pub fn camera(&self) -> Camera {
        self.cameras[0].clone()
    }

    /// Capture node of vimc instance `instance`
    pub fn node(&self, instance: u32) -> VirtualDeviceHandle {
        self.provider
            .handle(&format!("/dev/video{}", instance * 4 + 1))
            .unwrap()
    }

    /// Configure the default stream with `buffers` buffers
    pub fn configure(&mut self, camera: &Camera, buffers: u32) -> StreamId {
        let mut config = self
            .manager
            .generate_configuration(camera, &[StreamRole::VideoRecording])
            .unwrap();
        let stream = camera.streams[0];
        config.get_mut(stream).unwrap().buffer_count = buffers;
        self.manager.configure(camera, &config).unwrap();
        stream
    }

    /// Configure, allocate and start streaming
    pub fn streaming(&mut self, camera: &Camera, buffers: u32) -> StreamId {
        let stream = self.configure(camera, buffers);
        self.manager.allocate_buffers(camera, &[stream]).unwrap();
        self.manager.start(camera).unwrap();
        stream
    }

    pub fn queue(&mut self, camera: &Camera, stream: StreamId, cookie: u64, index: usize) {
        self.manager
            .queue_request(camera, request(&[(stream, index)], cookie))
            .unwrap();
    }

    pub fn drain(&self) -> Vec<Completion> {
        self.manager.completions().try_iter().collect()
    }
}

pub fn request(buffers: &[(StreamId, usize)], cookie: u64) -> Request {
    let mut request = Request::new(cookie);
    for &(stream, index) in buffers {
        request.add_buffer(stream, index).unwrap();
    }
    request
}

pub fn config(pixel_format: camgraph::capture::PixelFormat, width: u32, height: u32, buffers: u32) -> StreamConfiguration {
    StreamConfiguration {
        pixel_format,
        size: camgraph::capture::Size::new(width, height),
        buffer_count: buffers,
    }
}

/// `(cookie, status)` of every request completion, in delivery order
pub fn finished(completions: &[Completion]) -> Vec<(u64, RequestStatus)> {
    completions
        .iter()
        .filter_map(|c| match c {
            Completion::RequestComplete { request, .. } => Some((request.cookie(), request.status())),
            Completion::BufferComplete { .. } => None,
        })
        .collect()
}

/// `(cookie, buffer index)` of every buffer completion, in delivery order
pub fn filled(completions: &[Completion]) -> Vec<(u64, usize)> {
    completions
        .iter()
        .filter_map(|c| match c {
            Completion::BufferComplete { request, index, .. } => Some((*request, *index)),
            Completion::RequestComplete { .. } => None,
        })
        .collect()
}
