use serde::{Deserialize, Serialize};

/// Pad capabilities of an entity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PadFlags {
    pub source: bool,
    pub sink: bool,
}

impl PadFlags {
    pub const SOURCE: Self = Self {
        source: true,
        sink: false,
    };
    pub const SINK: Self = Self {
        source: false,
        sink: true,
    };
    pub const BOTH: Self = Self {
        source: true,
        sink: true,
    };
}

/// A named processing node in a media graph (sensor, debayer, scaler, capture node)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(default)]
    pub pads: PadFlags,
    /// Device node backing this entity, for video nodes
    #[serde(default)]
    pub devnode: Option<String>,
}

impl Entity {
    pub fn new(name: impl Into<String>, pads: PadFlags) -> Self {
        Self {
            name: name.into(),
            pads,
            devnode: None,
        }
    }

    pub fn with_devnode(mut self, devnode: impl Into<String>) -> Self {
        self.devnode = Some(devnode.into());
        self
    }
}

/// One discovered hardware instance: a driver-named collection of entities.
///
/// Entity order is discovery order and is preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDevice {
    pub driver: String,
    #[serde(default)]
    pub model: String,
    pub entities: Vec<Entity>,
}

impl MediaDevice {
    pub fn new(driver: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            model: model.into(),
            entities: Vec::new(),
        }
    }

    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn entity_by_name(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entity_by_name(name).is_some()
    }
}
