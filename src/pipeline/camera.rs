use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::capture::StreamId;

static NEXT_CAMERA_ID: AtomicU32 = AtomicU32::new(1);

/// Identity of a registered camera, unique for the life of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CameraId(u32);

impl CameraId {
    /// Reserve a fresh id. Handlers call this while matching, before the
    /// camera's devices are opened.
    pub fn next() -> Self {
        Self(NEXT_CAMERA_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "camera#{}", self.0)
    }
}

/// Lifecycle state of one camera
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
    Unconfigured,
    Configured,
    Allocated,
    Streaming,
}

/// Application-facing handle of a registered camera.
///
/// Holds no hardware knowledge; operations go through the
/// [`CameraManager`](super::CameraManager) to the owning pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Camera {
    pub id: CameraId,
    pub name: String,
    pub pipeline: String,
    pub streams: Vec<StreamId>,
}

impl Camera {
    pub fn owns(&self, stream: StreamId) -> bool {
        self.streams.contains(&stream)
    }
}
