//! Startup configuration: the initial fleet and timeouts, from a TOML file.
//!
//! The file only seeds the registry; every later change goes through the
//! `/config` CRUD surface.

use std::path::Path;

use serde::Deserialize;

use crate::registry::{NodeDescriptor, Registry, Timeouts};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub timeouts: Timeouts,
    pub models: Vec<NodeDescriptor>,
}

impl Settings {
    /// Load settings from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)?;
        let settings = toml::from_str(&text)?;
        Ok(settings)
    }

    pub fn registry(&self) -> Registry {
        Registry::with_nodes(self.models.clone(), self.timeouts)
    }
}
