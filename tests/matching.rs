mod common;

use std::sync::Arc;

use camgraph::capture::{BufferNotifier, DeviceProvider, VideoDevice, VirtualProvider};
use camgraph::media::{DeviceEnumerator, DeviceMatch, Entity, MediaDevice, PadFlags, StaticDiscovery};
use camgraph::pipeline::{vimc_topology, CameraManager, PipelineRegistry};
use camgraph::{Config, Error, Result};
use common::Rig;

fn graph(driver: &str, model: &str, entities: &[&str]) -> MediaDevice {
    entities.iter().fold(MediaDevice::new(driver, model), |dev, name| {
        dev.with_entity(Entity::new(*name, PadFlags::BOTH))
    })
}

/// Opens virtual nodes, except `broken` which fails like a missing driver
struct FlakyProvider {
    inner: VirtualProvider,
    broken: &'static str,
}

impl DeviceProvider for FlakyProvider {
    fn open(&self, entity: &Entity, notifier: BufferNotifier) -> Result<Box<dyn VideoDevice>> {
        if entity.devnode.as_deref() == Some(self.broken) {
            return Err(Error::device(&entity.name, "open failed"));
        }
        self.inner.open(entity, notifier)
    }
}

#[test]
fn first_superset_in_enumeration_order_wins() {
    let devices = [
        graph("uvc", "subset", &["sensor"]),
        graph("uvc", "superset", &["sensor", "capture", "isp"]),
        graph("uvc", "later", &["sensor", "capture"]),
    ];
    let mut dm = DeviceMatch::new("uvc");
    dm.add("sensor").add("capture");

    let found = dm.first_match(&devices).unwrap();
    assert_eq!(found.model, "superset");
    assert!(DeviceMatch::new("uvc").first_match(&devices).is_some());
    assert!(DeviceMatch::new("vimc").first_match(&devices).is_none());
}

#[test]
fn search_acquires_graphs_across_sources() {
    let first = StaticDiscovery::new(vec![graph("uvc", "one", &["sensor"])]);
    let second = StaticDiscovery::new(vec![graph("uvc", "two", &["sensor", "capture"])]);
    let enumerator = DeviceEnumerator::enumerate(&[&first, &second]).unwrap();
    let mut dm = DeviceMatch::new("uvc");
    dm.add("sensor");

    let a = enumerator.search(&dm).unwrap();
    let b = enumerator.search(&dm).unwrap();
    assert_eq!(a.device().model, "one");
    assert_eq!(b.device().model, "two");
    assert!(enumerator.search(&dm).is_none());

    drop(b);
    assert_eq!(enumerator.search(&dm).unwrap().device().model, "two");
}

#[test]
fn discovery_registers_one_camera_per_vimc_graph() {
    let rig = Rig::vimc(3);

    assert_eq!(rig.cameras.len(), 3);
    assert!(rig.cameras.iter().all(|c| c.pipeline == "vimc" && c.streams.len() == 1));
    assert!(rig.manager.get("VIMC Sensor B").is_some());
    assert_eq!(rig.provider.handles().len(), 3);
}

#[test]
fn disabled_handler_matches_nothing() {
    let mut enumerator = DeviceEnumerator::new();
    enumerator.add_device(vimc_topology(0));
    let mut config = Config::default();
    config.pipeline.handlers = vec!["rkisp1".into()];
    let provider: Arc<dyn DeviceProvider> = Arc::new(VirtualProvider::default());

    let mut manager = CameraManager::new();
    let found = manager
        .discover(&PipelineRegistry::with_defaults(), &enumerator, &config, provider);

    assert_eq!(found, 0);
    assert!(manager.cameras().is_empty());
}

#[test]
fn graph_without_every_entity_is_skipped() {
    let mut partial = vimc_topology(0);
    partial.entities.retain(|e| e.name != "Debayer B");
    let mut enumerator = DeviceEnumerator::new();
    enumerator.add_device(partial);
    enumerator.add_device(vimc_topology(1));
    let provider = VirtualProvider::default();
    let shared: Arc<dyn DeviceProvider> = Arc::new(provider.clone());

    let mut manager = CameraManager::new();
    let found = manager
        .discover(&PipelineRegistry::with_defaults(), &enumerator, &Config::default(), shared);

    assert_eq!(found, 1);
    assert!(provider.handle("/dev/video5").is_some());
    assert!(provider.handle("/dev/video1").is_none());
}

#[test]
fn configured_graphs_are_matched() {
    let config = Config::from_toml(
        r#"
        [[discovery.graphs]]
        driver = "vimc"
        model = "from config"
        entities = [
            { name = "Raw Capture 0" },
            { name = "Raw Capture 1", devnode = "/dev/video9" },
            { name = "RGB/YUV Capture" },
            { name = "Sensor A" },
            { name = "Sensor B" },
            { name = "Debayer A" },
            { name = "Debayer B" },
            { name = "RGB/YUV Input" },
            { name = "Scaler" },
        ]
        "#,
    )
    .unwrap();
    let discovery = StaticDiscovery::new(config.discovery.graphs.clone());
    let enumerator = DeviceEnumerator::enumerate(&[&discovery]).unwrap();
    let provider = VirtualProvider::default();
    let shared: Arc<dyn DeviceProvider> = Arc::new(provider.clone());

    let mut manager = CameraManager::new();
    manager
        .discover(&PipelineRegistry::with_defaults(), &enumerator, &config, shared);

    assert_eq!(manager.cameras().len(), 1);
    assert!(provider.handle("/dev/video9").is_some());
}

#[test]
fn failed_open_keeps_cameras_already_matched() {
    let mut enumerator = DeviceEnumerator::new();
    for instance in 0..3 {
        enumerator.add_device(vimc_topology(instance));
    }
    let virtual_nodes = VirtualProvider::default();
    let provider: Arc<dyn DeviceProvider> = Arc::new(FlakyProvider {
        inner: virtual_nodes.clone(),
        broken: "/dev/video5",
    });

    let mut manager = CameraManager::new();
    let found = manager.discover(&PipelineRegistry::with_defaults(), &enumerator, &Config::default(), provider);

    assert_eq!(found, 1);
    assert_eq!(manager.cameras().len(), 1);
    assert!(virtual_nodes.handle("/dev/video1").is_some());
    assert!(virtual_nodes.handle("/dev/video9").is_none());

    // The graph whose node failed to open is free again
    let mut dm = DeviceMatch::new("vimc");
    dm.add("Raw Capture 1");
    assert_eq!(enumerator.search(&dm).unwrap().device().model, "VIMC MDEV 1");
}
