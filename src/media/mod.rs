//! Media graph discovery and topology matching

pub mod discovery;
pub mod entity;
pub mod matcher;

pub use discovery::{DeviceEnumerator, PlatformDiscovery, StaticDiscovery};
#[cfg(feature = "v4l2")]
pub use discovery::V4l2Discovery;
pub use entity::{Entity, MediaDevice, PadFlags};
pub use matcher::{BoundHardware, DeviceMatch};
