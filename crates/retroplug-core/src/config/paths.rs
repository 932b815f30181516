//! Standard locations for RetroPlug files

use std::path::PathBuf;

/// Per-user RetroPlug directory
///
/// Returns: `{config_dir}/retroplug`, falling back to `~/.retroplug` and
/// finally the working directory.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("retroplug"))
        .or_else(|| dirs::home_dir().map(|home| home.join(".retroplug")))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Default path of a config file inside [`default_config_dir`]
pub fn default_config_path(filename: &str) -> PathBuf {
    default_config_dir().join(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_includes_filename() {
        let path = default_config_path("retroplug.yaml");
        assert!(path.ends_with("retroplug.yaml"));
        assert!(path.starts_with(default_config_dir()));
    }
}
