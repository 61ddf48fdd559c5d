//! Topology matching: required entity names against discovered graphs

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::entity::{Entity, MediaDevice};

/// Requirements a pipeline handler places on a media graph.
///
/// A graph matches when its driver is equal and every required entity name is
/// present. Extra entities in the graph are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMatch {
    driver: String,
    entities: Vec<String>,
}

impl DeviceMatch {
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            entities: Vec::new(),
        }
    }

    pub fn add(&mut self, entity: impl Into<String>) -> &mut Self {
        self.entities.push(entity.into());
        self
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn entities(&self) -> &[String] {
        &self.entities
    }

    pub fn matches(&self, device: &MediaDevice) -> bool {
        device.driver == self.driver && self.entities.iter().all(|name| device.contains(name))
    }

    /// First graph, in the given order, that satisfies this match.
    pub fn first_match<'a, I>(&self, devices: I) -> Option<&'a MediaDevice>
    where
        I: IntoIterator<Item = &'a MediaDevice>,
    {
        devices.into_iter().find(|dev| self.matches(dev))
    }
}

/// A discovered graph plus its acquisition flag
#[derive(Debug)]
pub(crate) struct DeviceSlot {
    pub(crate) device: MediaDevice,
    acquired: AtomicBool,
}

impl DeviceSlot {
    pub(crate) fn new(device: MediaDevice) -> Self {
        Self {
            device,
            acquired: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_acquired(&self) -> bool {
        self.acquired.load(Ordering::Acquire)
    }

    pub(crate) fn try_acquire(&self) -> bool {
        self.acquired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn release(&self) {
        self.acquired.store(false, Ordering::Release);
    }
}

/// Exclusive claim on one matched media graph.
///
/// Dropping the handle releases the graph so another handler may acquire it.
pub struct BoundHardware {
    slot: Arc<DeviceSlot>,
}

impl BoundHardware {
    pub(crate) fn new(slot: Arc<DeviceSlot>) -> Self {
        Self { slot }
    }

    pub fn device(&self) -> &MediaDevice {
        &self.slot.device
    }

    pub fn driver(&self) -> &str {
        &self.slot.device.driver
    }

    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.slot.device.entity_by_name(name)
    }
}

impl fmt::Debug for BoundHardware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundHardware")
            .field("driver", &self.slot.device.driver)
            .field("model", &self.slot.device.model)
            .finish()
    }
}

impl Drop for BoundHardware {
    fn drop(&mut self) {
        debug!(driver = %self.slot.device.driver, "Releasing media device");
        self.slot.release();
    }
}
