//! FilesystemRegistry: named `Filesystem` instances built on first use.

use std::collections::HashMap;
use std::path::Path;

use tracing::info;

use crate::config::{FilesystemConfig, Settings, DEFAULT_NAME};
use crate::error::{FilesystemError, Result};
use crate::filesystem::Filesystem;

/// Hands out one `Filesystem` per configured name.
#[derive(Debug, Default)]
pub struct FilesystemRegistry {
    settings: Settings,
    instances: HashMap<String, Filesystem>,
}

impl FilesystemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: Settings) -> Self {
        Self {
            settings,
            instances: HashMap::new(),
        }
    }

    /// Build from discovered config files and the environment.
    pub fn load() -> Result<Self> {
        Self::load_with_override(None)
    }

    pub fn load_with_override(path: Option<&Path>) -> Result<Self> {
        let (settings, sources) = Settings::load_with_override(path)
            .map_err(|e| FilesystemError::Config(format!("{e:#}")))?;
        info!(files = ?sources.files, env = ?sources.env_overrides, "filesystem settings loaded");
        Ok(Self::from_settings(settings))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Register configuration for `name`; used the next time it is built.
    pub fn configure(&mut self, name: impl Into<String>, config: FilesystemConfig) -> &mut Self {
        self.settings.insert(name, config);
        self
    }

    /// The instance for `name` (`"default"` when `None`), built from its
    /// configuration on first access.
    pub fn get(&mut self, name: Option<&str>) -> Result<&mut Filesystem> {
        let name = name.filter(|name| !name.is_empty()).unwrap_or(DEFAULT_NAME);

        if !self.instances.contains_key(name) {
            let config = self
                .settings
                .get(name)
                .cloned()
                .ok_or_else(|| FilesystemError::ConfigNotFound(name.to_string()))?;
            info!(name, adapter = %config.adapter, "building filesystem");
            self.instances.insert(name.to_string(), Filesystem::new(config)?);
        }

        self.instances
            .get_mut(name)
            .ok_or_else(|| FilesystemError::ConfigNotFound(name.to_string()))
    }

    /// Register a ready-made instance, replacing any cached one.
    pub fn add(&mut self, name: impl Into<String>, filesystem: Filesystem) {
        self.instances.insert(name.into(), filesystem);
    }

    /// Whether an instance is cached under `name`.
    pub fn exists(&self, name: &str) -> bool {
        self.instances.contains_key(name)
    }

    /// Drop every cached instance; configuration is kept.
    pub fn reset(&mut self) {
        self.instances.clear();
    }
}
