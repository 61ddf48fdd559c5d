use thiserror::Error;

use crate::capture::{StreamConfiguration, StreamId};
use crate::pipeline::{CameraId, CameraState};

/// Errors surfaced by the capture core.
///
/// A failed device match is not represented here: matching returns `None`
/// and the caller moves on to the next handler or graph.
#[derive(Debug, Error)]
pub enum Error {
    /// The hardware accepted a different configuration than the one requested.
    #[error("configuration rejected for {stream}: requested {requested}, hardware applied {applied}")]
    Invalid {
        stream: StreamId,
        requested: StreamConfiguration,
        applied: StreamConfiguration,
    },

    /// The configuration itself is malformed (no streams, zero buffers, ...).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A call across the hardware boundary failed.
    #[error("device error on {device}: {reason}")]
    Device { device: String, reason: String },

    /// Unknown camera, or a stream that does not belong to the camera.
    #[error("{0} not found")]
    NotFound(String),

    /// The hardware or caller broke the request/buffer contract.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Lifecycle operation attempted from the wrong state.
    #[error("camera {camera}: cannot {operation} while {state:?}")]
    InvalidState {
        camera: CameraId,
        state: CameraState,
        operation: &'static str,
    },

    #[error("configuration: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    pub fn device(device: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Device {
            device: device.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
