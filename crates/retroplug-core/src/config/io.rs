//! YAML configuration loading and saving

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Load a configuration from a YAML file
///
/// A missing file yields defaults. A file that cannot be read or parsed is
/// logged and also yields defaults, so a broken config never stops the
/// host from loading the plugin.
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("load_config: {:?} not found, using defaults", path);
        return T::default();
    }

    match read_config(path) {
        Ok(config) => {
            log::info!("load_config: loaded {:?}", path);
            config
        }
        Err(e) => {
            log::warn!("load_config: {:#}, using defaults", e);
            T::default()
        }
    }
}

/// Load a configuration, failing on any I/O or parse error
pub fn read_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    serde_yaml::from_str(&contents).with_context(|| format!("Failed to parse config: {:?}", path))
}

/// Save a configuration to a YAML file, creating parent directories
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;
    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    log::info!("save_config: wrote {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SystemConfig;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config: SystemConfig = load_config(Path::new("/nonexistent/retroplug/config.yaml"));
        assert_eq!(config, SystemConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("retroplug.yaml");

        let mut config = SystemConfig::default();
        config.sample_rate = 48_000;
        config.capacities.press_buttons = 64;
        config.render.max_block_frames = 256;

        save_config(&config, &path).unwrap();
        let loaded: SystemConfig = load_config(&path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_broken_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("retroplug.yaml");
        std::fs::write(&path, "sample_rate: [not, a, number]").unwrap();

        let config: SystemConfig = load_config(&path);
        assert_eq!(config, SystemConfig::default());
        assert!(read_config::<SystemConfig>(&path).is_err());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("retroplug.yaml");
        std::fs::write(&path, "output_channels: 8\ncapacities:\n  fetch_state: 2\n").unwrap();

        let config: SystemConfig = read_config(&path).unwrap();
        assert_eq!(config.output_channels, 8);
        assert_eq!(config.capacities.fetch_state, 2);
        assert_eq!(config.capacities.press_buttons, 32);
        assert_eq!(config.sample_rate, 44_100);
    }
}
