//! Pipeline handlers, requests and completion correlation

pub mod camera;
pub mod correlator;
pub mod handler;
pub mod manager;
pub mod registry;
pub mod request;
pub mod vimc;

pub use camera::{Camera, CameraId, CameraState};
pub use correlator::{Correlation, InFlightQueue};
pub use handler::{CameraData, CameraPipeline, Pipeline, PipelineHandler};
pub use manager::CameraManager;
pub use registry::{PipelineFactory, PipelineRegistry};
pub use request::{Completion, Request, RequestStatus};
pub use vimc::{vimc_topology, VimcCameraData, VimcHandler};
