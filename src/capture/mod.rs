pub mod buffer;
pub mod device;
pub mod format;
pub mod stream;
pub mod virtual_device;

pub use buffer::{Buffer, BufferMetadata, BufferPool, BufferStatus};
pub use device::{BufferNotifier, BufferReady, DeviceFormat, DeviceProvider, VideoDevice};
pub use format::{PixelFormat, Size};
pub use stream::{CameraConfiguration, Stream, StreamConfiguration, StreamId, StreamRole};
pub use virtual_device::{Fault, VirtualDeviceHandle, VirtualDeviceOptions, VirtualProvider, VirtualVideoDevice};
