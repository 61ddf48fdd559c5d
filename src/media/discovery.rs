//! Platform discovery and the enumerated device snapshot

use std::sync::Arc;

use tracing::{debug, info};

use super::entity::MediaDevice;
use super::matcher::{BoundHardware, DeviceMatch, DeviceSlot};
use crate::error::Result;

/// Source of media graphs exposed by the platform
pub trait PlatformDiscovery {
    fn enumerate(&self) -> Result<Vec<MediaDevice>>;
}

/// Discovery over a fixed list of graphs, in the order given
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    devices: Vec<MediaDevice>,
}

impl StaticDiscovery {
    pub fn new(devices: Vec<MediaDevice>) -> Self {
        Self { devices }
    }

    pub fn push(&mut self, device: MediaDevice) {
        self.devices.push(device);
    }
}

impl PlatformDiscovery for StaticDiscovery {
    fn enumerate(&self) -> Result<Vec<MediaDevice>> {
        Ok(self.devices.clone())
    }
}

/// Snapshot of discovered graphs that pipeline handlers search and acquire from
#[derive(Debug, Default)]
pub struct DeviceEnumerator {
    slots: Vec<Arc<DeviceSlot>>,
}

impl DeviceEnumerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enumerate every source in order and concatenate the results
    pub fn enumerate(sources: &[&dyn PlatformDiscovery]) -> Result<Self> {
        let mut enumerator = Self::new();
        for source in sources {
            for device in source.enumerate()? {
                enumerator.add_device(device);
            }
        }
        info!(devices = enumerator.len(), "Media device enumeration complete");
        Ok(enumerator)
    }

    pub fn add_device(&mut self, device: MediaDevice) {
        debug!(
            driver = %device.driver,
            model = %device.model,
            entities = device.entities.len(),
            "Adding media device"
        );
        self.slots.push(Arc::new(DeviceSlot::new(device)));
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn devices(&self) -> impl Iterator<Item = &MediaDevice> {
        self.slots.iter().map(|slot| &slot.device)
    }

    /// Acquire the first free graph satisfying `dm`.
    ///
    /// `None` means this handler does not apply to any remaining graph.
    pub fn search(&self, dm: &DeviceMatch) -> Option<BoundHardware> {
        for slot in &self.slots {
            if slot.is_acquired() || !dm.matches(&slot.device) {
                continue;
            }
            if slot.try_acquire() {
                debug!(driver = %dm.driver(), model = %slot.device.model, "Acquired media device");
                return Some(BoundHardware::new(Arc::clone(slot)));
            }
        }
        None
    }
}

/// Discovery over V4L2 video nodes, grouping nodes that share driver and bus
/// into one graph
#[cfg(feature = "v4l2")]
#[derive(Debug, Clone)]
pub struct V4l2Discovery {
    max_nodes: u32,
}

#[cfg(feature = "v4l2")]
impl V4l2Discovery {
    pub fn new(max_nodes: u32) -> Self {
        Self { max_nodes }
    }
}

#[cfg(feature = "v4l2")]
impl PlatformDiscovery for V4l2Discovery {
    fn enumerate(&self) -> Result<Vec<MediaDevice>> {
        use std::path::Path;

        use v4l::capability::Flags;
        use v4l::Device;

        use super::entity::{Entity, PadFlags};

        info!("Probing V4L2 video nodes...");

        let mut groups: Vec<(String, MediaDevice)> = Vec::new();
        for i in 0..self.max_nodes {
            let path = format!("/dev/video{}", i);
            if !Path::new(&path).exists() {
                continue;
            }

            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };

            let pads = if caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
                PadFlags::SINK
            } else {
                PadFlags::SOURCE
            };
            debug!(node = %path, card = %caps.card, driver = %caps.driver, "Found video node");

            let entity = Entity::new(caps.card.clone(), pads).with_devnode(path);
            let key = format!("{}@{}", caps.driver, caps.bus);
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, device)) => device.entities.push(entity),
                None => groups.push((
                    key,
                    MediaDevice::new(caps.driver, caps.card).with_entity(entity),
                )),
            }
        }

        Ok(groups.into_iter().map(|(_, device)| device).collect())
    }
}
