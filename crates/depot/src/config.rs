//! Filesystem configuration with file discovery and environment overrides.
//!
//! Config files are TOML with one `[filesystem.<name>]` section per named
//! filesystem:
//! ```toml
//! [filesystem.default]
//! adapter = "Local"
//! adapter_arguments = ["/srv/uploads"]
//! formatter = "Entity"
//!
//! [filesystem.default.normalizer]
//! hashing_algo = "sha256"
//! fallback_filename = "unnamed"
//! ```
//!
//! Files are loaded in order, later files replacing whole sections:
//! - `/etc/depot/config.toml`
//! - `<user config dir>/depot/config.toml`
//! - `./depot.toml` (or an explicit override path)
//!
//! Environment variables, applied to the `default` section:
//! - `DEPOT_ROOT`: root directory for the local adapter
//! - `DEPOT_FORMATTER`: formatter name
//! - `DEPOT_HASHING_ALGO`: digest used by the normalizer
//!
//! Default root: `~/.depot/files`

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::normalizer::NormalizerConfig;

/// Name used when no filesystem name is given.
pub const DEFAULT_NAME: &str = "default";

/// Configuration of one `Filesystem`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesystemConfig {
    /// Storage adapter, by short name ("Local", "Memory") or qualified name.
    pub adapter: String,

    /// Arguments for the adapter; the local adapter takes its root directory.
    pub adapter_arguments: Vec<String>,

    /// Formatter used when an operation does not pick one.
    pub formatter: String,

    pub normalizer: NormalizerConfig,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            adapter: "Local".to_string(),
            adapter_arguments: vec![default_root().to_string_lossy().into_owned()],
            formatter: "Default".to_string(),
            normalizer: NormalizerConfig::default(),
        }
    }
}

/// Get the default storage root (~/.depot/files).
fn default_root() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".depot").join("files"))
        .unwrap_or_else(|| PathBuf::from(".depot/files"))
}

impl FilesystemConfig {
    /// Local-disk storage under `root`.
    pub fn local(root: impl AsRef<Path>) -> Self {
        Self {
            adapter_arguments: vec![root.as_ref().to_string_lossy().into_owned()],
            ..Default::default()
        }
    }

    /// In-memory storage.
    pub fn memory() -> Self {
        Self {
            adapter: "Memory".to_string(),
            adapter_arguments: Vec::new(),
            ..Default::default()
        }
    }

    pub fn with_formatter(mut self, formatter: impl Into<String>) -> Self {
        self.formatter = formatter.into();
        self
    }

    pub fn with_normalizer(mut self, normalizer: NormalizerConfig) -> Self {
        self.normalizer = normalizer;
        self
    }
}

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Every named filesystem configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub filesystem: BTreeMap<String, FilesystemConfig>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings with a single `default` filesystem.
    pub fn with_default(config: FilesystemConfig) -> Self {
        let mut settings = Self::new();
        settings.insert(DEFAULT_NAME, config);
        settings
    }

    pub fn insert(&mut self, name: impl Into<String>, config: FilesystemConfig) {
        self.filesystem.insert(name.into(), config);
    }

    pub fn get(&self, name: &str) -> Option<&FilesystemConfig> {
        self.filesystem.get(name)
    }

    /// Discover and load config files, then apply environment overrides.
    pub fn load() -> Result<(Self, ConfigSources)> {
        Self::load_with_override(None)
    }

    /// Like [`Settings::load`], with `path` replacing the local `depot.toml`.
    pub fn load_with_override(path: Option<&Path>) -> Result<(Self, ConfigSources)> {
        let mut settings = Self::new();
        let mut sources = ConfigSources::default();

        for file in discover_config_files(path) {
            let loaded = Self::from_file(&file)?;
            settings.overlay(loaded);
            sources.files.push(file);
        }

        settings.apply_overrides(|key| env::var(key).ok(), &mut sources);
        debug!(
            files = sources.files.len(),
            env_overrides = sources.env_overrides.len(),
            "loaded depot settings"
        );
        Ok((settings, sources))
    }

    /// Load a single TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("failed to parse TOML: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let table: toml::Table = contents.parse().context("invalid TOML")?;

        // Files without a [filesystem] table contribute nothing
        match table.get("filesystem") {
            Some(section) => {
                let filesystem: BTreeMap<String, FilesystemConfig> = section
                    .clone()
                    .try_into()
                    .context("failed to parse [filesystem] section")?;
                Ok(Self { filesystem })
            }
            None => Ok(Self::new()),
        }
    }

    /// Merge `other` into `self`; its sections replace same-named ones.
    pub fn overlay(&mut self, other: Settings) {
        self.filesystem.extend(other.filesystem);
    }

    /// Apply `DEPOT_*` overrides to the `default` section, reading values
    /// through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
        sources: &mut ConfigSources,
    ) {
        let mut overridden = Vec::new();

        let root = lookup("DEPOT_ROOT");
        let formatter = lookup("DEPOT_FORMATTER");
        let hashing_algo = lookup("DEPOT_HASHING_ALGO");
        if root.is_none() && formatter.is_none() && hashing_algo.is_none() {
            return;
        }

        let config = self.filesystem.entry(DEFAULT_NAME.to_string()).or_default();
        if let Some(root) = root {
            match config.adapter_arguments.first_mut() {
                Some(first) => *first = root,
                None => config.adapter_arguments.push(root),
            }
            overridden.push("DEPOT_ROOT");
        }
        if let Some(formatter) = formatter {
            config.formatter = formatter;
            overridden.push("DEPOT_FORMATTER");
        }
        if let Some(hashing_algo) = hashing_algo {
            config.normalizer.hashing_algo = hashing_algo;
            overridden.push("DEPOT_HASHING_ALGO");
        }

        sources
            .env_overrides
            .extend(overridden.into_iter().map(str::to_string));
    }
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local/override).
/// Only returns files that exist.
pub fn discover_config_files(override_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/depot/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("depot/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    // Override takes precedence over local
    if let Some(path) = override_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("depot.toml");
    if local.exists() {
        files.push(local);
    }

    files
}
