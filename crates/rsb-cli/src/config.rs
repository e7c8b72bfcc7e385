//! Config file loading for the rsb CLI

use anyhow::{Context, Result};
use rsb_core::Config;
use std::fs;
use std::path::{Path, PathBuf};

/// Default config location, `<config dir>/rsb/config.toml`
pub fn default_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Could not determine config directory")?
        .join("rsb");

    Ok(config_dir.join("config.toml"))
}

pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(p) => Ok(p.to_path_buf()),
        None => default_config_path(),
    }
}

/// Load configuration from file, or defaults if it doesn't exist
pub fn load(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?
    } else {
        log::info!("no config at {}, using defaults", path.display());
        Config::default()
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Save configuration to file
pub fn save(path: &Path, config: &Config) -> Result<()> {
    // Create config directory if it doesn't exist
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create config directory at {}", parent.display())
        })?;
    }

    let contents = toml::to_string_pretty(config).context("Failed to serialize config")?;

    fs::write(path, contents)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;

    Ok(())
}
