pub mod types;

use crate::error::Result;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "profiling-operator.toml";

/// Get the global config file path (~/.config/profiling-operator/config.toml).
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("profiling-operator").join("config.toml"))
}

/// Get the local config file path (cwd/profiling-operator.toml).
pub fn local_config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE_NAME)
}

/// Load configuration from file or use defaults.
///
/// Checks a local config in the current working directory first, then the
/// global config, then falls back to `types::Config::default()`.
pub fn load_config(explicit_path: Option<&Path>) -> Result<types::Config> {
    if let Some(path) = explicit_path {
        let content = fs::read_to_string(path)?;
        return Ok(toml::from_str(&content)?);
    }

    if let Ok(cwd) = env::current_dir() {
        let local = local_config_path(&cwd);
        if local.exists() {
            let content = fs::read_to_string(&local)?;
            if let Ok(config) = toml::from_str(&content) {
                return Ok(config);
            }
        }
    }

    if let Some(global) = global_config_path() {
        if global.exists() {
            let content = fs::read_to_string(&global)?;
            if let Ok(config) = toml::from_str(&content) {
                return Ok(config);
            }
        }
    }

    Ok(types::Config::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn explicit_path_is_parsed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "health_addr = \"127.0.0.1:9999\"\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.health_addr, "127.0.0.1:9999");
        assert_eq!(config.metrics_addr, types::Config::default().metrics_addr);
    }

    #[test]
    fn explicit_path_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("does-not-exist.toml");
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn local_config_path_joins_file_name() {
        let dir = tempdir().unwrap();
        assert_eq!(
            local_config_path(dir.path()),
            dir.path().join("profiling-operator.toml")
        );
    }
}
