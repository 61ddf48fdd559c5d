pub mod capture;
pub mod error;
pub mod media;
pub mod pipeline;

use std::path::Path;

use arc_swap::ArcSwap;
use capture::{PixelFormat, Size, StreamConfiguration, VirtualDeviceOptions};
use serde::{Deserialize, Serialize};

pub use error::{Error, Result};
pub use media::MediaDevice;

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
    pub discovery: DiscoveryConfig,
    pub simulation: SimulationConfig,
}

/// Defaults handed out by `generate_configuration`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            format: PixelFormat::Rgb24,
            buffer_count: 4,
        }
    }
}

impl CaptureConfig {
    pub fn stream_defaults(&self) -> StreamConfiguration {
        StreamConfiguration {
            pixel_format: self.format,
            size: Size::new(self.width, self.height),
            buffer_count: self.buffer_count,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Handlers to instantiate, by name. Empty enables every registered handler.
    pub handlers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Number of emulated vimc graphs to expose
    pub virtual_vimc: u32,
    /// Additional graphs described in configuration
    pub graphs: Vec<MediaDevice>,
    /// Probe /dev/video* nodes (requires the `v4l2` feature)
    pub v4l2: bool,
    pub max_video_nodes: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            virtual_vimc: 1,
            graphs: Vec::new(),
            v4l2: false,
            max_video_nodes: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Frame clock of emulated capture nodes
    pub fps: u32,
    /// Stop after this many completed requests; 0 runs until interrupted
    pub frames: u64,
    pub device: VirtualDeviceOptions,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            frames: 0,
            device: VirtualDeviceOptions::default(),
        }
    }
}

impl Config {
    /// Defaults, overlaid with `path` (TOML) if given, overlaid with
    /// `CAMGRAPH_SECTION__KEY` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("CAMGRAPH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Defaults overlaid with an in-memory TOML document
    pub fn from_toml(toml: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Currently published configuration
    pub fn current() -> std::sync::Arc<Config> {
        CONFIG.load_full()
    }
}
