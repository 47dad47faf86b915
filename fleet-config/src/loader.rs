// Standard library imports
use std::fs;
use std::path::{Path, PathBuf};

// External crate imports
use anyhow::{Context, Result};
use tracing::debug;

// Internal imports
use crate::config::RestoreConfig;

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "FLEET_RESTORE_CONFIG";

/// Default system-wide config location.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/fleet/restore.yaml";

/// Finds and loads `restore.yaml`.
///
/// Priority chain:
/// 1. **Explicit path** passed by the caller (e.g. `--config`). Must exist.
/// 2. **Environment:** the file named by `FLEET_RESTORE_CONFIG`. Must exist.
/// 3. **System config** at `/etc/fleet/restore.yaml`, if present.
/// 4. **Built-in defaults.**
pub struct ConfigLoader {
    system_path: PathBuf,
    env_path: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            system_path: PathBuf::from(SYSTEM_CONFIG_PATH),
            env_path: std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from),
        }
    }

    /// Loader with both fallback locations pinned, independent of the process environment.
    pub fn with_paths(system_path: PathBuf, env_path: Option<PathBuf>) -> Self {
        Self {
            system_path,
            env_path,
        }
    }

    pub fn load(&self, explicit: Option<&Path>) -> Result<RestoreConfig> {
        if let Some(path) = explicit {
            debug!("Loading config from: {}", path.display());
            return Self::load_file(path);
        }

        if let Some(path) = &self.env_path {
            debug!("Loading config from {}: {}", CONFIG_ENV_VAR, path.display());
            return Self::load_file(path)
                .with_context(|| format!("{} points at an unusable file", CONFIG_ENV_VAR));
        }

        if self.system_path.exists() {
            debug!("Loading config from: {}", self.system_path.display());
            return Self::load_file(&self.system_path);
        }

        debug!("No restore config found, using defaults");
        Ok(RestoreConfig::default())
    }

    /// Reads, parses and validates one config file.
    pub fn load_file(path: &Path) -> Result<RestoreConfig> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read file at {}", path.display()))?;

        let config: RestoreConfig = serde_yaml_ng::from_str(&contents)
            .with_context(|| format!("Invalid restore config in {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid restore config in {}", path.display()))?;

        Ok(config)
    }
}
