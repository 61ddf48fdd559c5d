//! Explicit table of pipeline handler factories

use std::sync::Arc;

use tracing::{debug, warn};

use crate::capture::DeviceProvider;
use crate::Config;

use super::handler::CameraPipeline;
use super::vimc::VimcHandler;

/// Builds one pipeline instance
pub type PipelineFactory = fn(&Config, Arc<dyn DeviceProvider>) -> Box<dyn CameraPipeline>;

/// Pipeline handlers known to the process, in matching order.
///
/// Populated at startup by explicit `register` calls.
#[derive(Default)]
pub struct PipelineRegistry {
    factories: Vec<(&'static str, PipelineFactory)>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every handler shipped in this crate
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("vimc", VimcHandler::create);
        registry
    }

    /// Add a factory. A second registration under the same name replaces the
    /// first and keeps its position.
    pub fn register(&mut self, name: &'static str, factory: PipelineFactory) {
        if let Some(entry) = self.factories.iter_mut().find(|(n, _)| *n == name) {
            warn!(handler = name, "Replacing registered pipeline handler");
            entry.1 = factory;
            return;
        }
        debug!(handler = name, "Registered pipeline handler");
        self.factories.push((name, factory));
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.iter().map(|(name, _)| *name)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Instantiate the handlers enabled in `config` (all of them when the
    /// list is empty), in registration order
    pub fn instantiate(
        &self,
        config: &Config,
        provider: Arc<dyn DeviceProvider>,
    ) -> Vec<Box<dyn CameraPipeline>> {
        let enabled = &config.pipeline.handlers;
        self.factories
            .iter()
            .filter(|(name, _)| enabled.is_empty() || enabled.iter().any(|e| e == name))
            .map(|(_, factory)| factory(config, Arc::clone(&provider)))
            .collect()
    }
}
