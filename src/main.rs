//! camgraph demo: discover cameras, stream from the first one and recycle
//! its requests until interrupted

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use camgraph::capture::{DeviceProvider, StreamRole, VirtualProvider};
use camgraph::media::{DeviceEnumerator, PlatformDiscovery, StaticDiscovery};
use camgraph::pipeline::{vimc_topology, CameraManager, Completion, PipelineRegistry, Request, RequestStatus};
use camgraph::Config;
use color_eyre::{eyre::eyre, Result};
use tracing::{debug, error, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("camgraph=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("camgraph launching...");

    // Load configuration
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(path.as_deref())?;
    camgraph::CONFIG.store(Arc::new(config.clone()));

    // Platform discovery
    let mut graphs = StaticDiscovery::default();
    for instance in 0..config.discovery.virtual_vimc {
        graphs.push(vimc_topology(instance));
    }
    for graph in &config.discovery.graphs {
        graphs.push(graph.clone());
    }
    #[cfg_attr(not(feature = "v4l2"), allow(unused_mut))]
    let mut sources: Vec<Box<dyn PlatformDiscovery>> = vec![Box::new(graphs)];
    if config.discovery.v4l2 {
        #[cfg(feature = "v4l2")]
        sources.push(Box::new(camgraph::media::V4l2Discovery::new(
            config.discovery.max_video_nodes,
        )));
        #[cfg(not(feature = "v4l2"))]
        warn!("V4L2 discovery requested but the v4l2 feature is disabled");
    }
    let sources: Vec<&dyn PlatformDiscovery> = sources.iter().map(|s| s.as_ref()).collect();
    let enumerator = DeviceEnumerator::enumerate(&sources)?;

    // Match pipeline handlers against the graphs
    let provider = VirtualProvider::new(config.simulation.device.clone());
    let registry = PipelineRegistry::with_defaults();
    let mut manager = CameraManager::new();
    let shared: Arc<dyn DeviceProvider> = Arc::new(provider.clone());
    manager.discover(&registry, &enumerator, &config, shared);

    let camera = manager
        .cameras()
        .first()
        .cloned()
        .ok_or_else(|| eyre!("no camera found"))?;
    info!(camera = %camera.id, name = %camera.name, pipeline = %camera.pipeline, "Using camera");

    // Configure and allocate
    let cam_config = manager.generate_configuration(&camera, &[StreamRole::VideoRecording])?;
    manager.configure(&camera, &cam_config)?;
    let streams: Vec<_> = cam_config.streams().collect();
    manager.allocate_buffers(&camera, &streams)?;
    manager.start(&camera)?;

    // One request per buffer of the first stream
    let stream = *streams.first().ok_or_else(|| eyre!("camera has no streams"))?;
    let buffers = manager.pool_len(&camera, stream).unwrap_or(0);
    for index in 0..buffers {
        let mut request = Request::new(index as u64);
        request.add_buffer(stream, index)?;
        manager.queue_request(&camera, request)?;
    }

    // Frame clock driving the emulated sensors
    let period = Duration::from_secs_f64(1.0 / f64::from(config.simulation.fps.max(1)));
    let clock = provider.clone();
    let _clock_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            for handle in clock.handles() {
                handle.complete_next();
            }
        }
    });

    let completions = manager.completions();
    let limit = config.simulation.frames;
    let mut completed = 0u64;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    'run: loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted");
                break 'run;
            }
            res = manager.dispatch_next() => {
                if let Err(e) = res {
                    error!("Dispatch error: {}", e);
                    break 'run;
                }
            }
        }

        let ready: Vec<_> = completions.try_iter().collect();
        for completion in ready {
            match completion {
                Completion::BufferComplete { request, stream, metadata, .. } => {
                    debug!(request, %stream, sequence = metadata.sequence, bytes = metadata.bytes_used, "Buffer complete");
                }
                Completion::RequestComplete { mut request, .. } => {
                    if request.status() != RequestStatus::Complete {
                        continue;
                    }
                    completed += 1;
                    if limit > 0 && completed >= limit {
                        info!(completed, "Frame limit reached");
                        break 'run;
                    }
                    request.reuse();
                    if let Err(e) = manager.queue_request(&camera, request) {
                        error!("Failed to requeue request: {}", e);
                        break 'run;
                    }
                }
            }
        }
    }

    // Tear down
    if let Err(e) = manager.stop(&camera) {
        warn!("Stop reported an error: {}", e);
    }
    let drained = completions.try_iter().count();
    manager.free_buffers(&camera, &streams)?;
    manager.remove_camera(&camera)?;

    info!(completed, drained, "camgraph shutting down");
    Ok(())
}
