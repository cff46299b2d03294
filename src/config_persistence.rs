//! Loading and writing `config.toml`.

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::config::{sanitize_config, Config};

pub const APP_DIR_NAME: &str = "artscout";
const CONFIG_FILE_NAME: &str = "config.toml";

/// `<config dir>/artscout`, or a relative `artscout` directory when the
/// platform reports no config dir.
pub fn config_root() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(APP_DIR_NAME))
}

pub fn default_config_path() -> PathBuf {
    config_root().join(CONFIG_FILE_NAME)
}

/// `<cache dir>/artscout`, falling back next to the config file.
pub fn cache_root() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .unwrap_or_else(|| config_root().join("cache"))
}

pub fn persist_config_file(config: &Config, path: &Path) {
    let config_text = match toml::to_string(config) {
        Ok(text) => text,
        Err(err) => {
            log::error!("Failed to serialize config for {}: {}", path.display(), err);
            return;
        }
    };
    if let Some(parent) = path.parent() {
        if let Err(err) = std::fs::create_dir_all(parent) {
            log::error!(
                "Failed to create config directory {}: {}",
                parent.display(),
                err
            );
            return;
        }
    }
    if let Err(err) = std::fs::write(path, config_text) {
        log::error!("Failed to persist config to {}: {}", path.display(), err);
    }
}

/// Reads and sanitizes the config at `path`, writing defaults first when the
/// file does not exist. Unreadable or unparsable files yield defaults.
pub fn load_or_create_config(path: &Path) -> Config {
    if !path.exists() {
        info!(
            "Config file not found. Creating default config. path={}",
            path.display()
        );
        let default_config = sanitize_config(Config::default());
        persist_config_file(&default_config, path);
        return default_config;
    }

    let config_content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            warn!(
                "Failed to read config file {}. Using defaults. error={}",
                path.display(),
                err
            );
            return sanitize_config(Config::default());
        }
    };
    match toml::from_str::<Config>(&config_content) {
        Ok(config) => sanitize_config(config),
        Err(err) => {
            warn!(
                "Failed to parse config file {}. Using defaults. error={}",
                path.display(),
                err
            );
            sanitize_config(Config::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{load_or_create_config, persist_config_file};
    use crate::config::{Config, SearchPriority};

    #[test]
    fn test_missing_config_is_created_with_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");
        let config = load_or_create_config(&path);
        assert_eq!(config, Config::default());
        assert!(path.exists());

        let reloaded = load_or_create_config(&path);
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_unparsable_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[search\npriority = ").expect("write broken config");
        assert_eq!(load_or_create_config(&path), Config::default());
    }

    #[test]
    fn test_persisted_config_round_trips_and_is_sanitized_on_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.search.priority = SearchPriority::LocalOnly;
        config.catalog.batch_size = 0;
        persist_config_file(&config, &path);

        let loaded = load_or_create_config(&path);
        assert_eq!(loaded.search.priority, SearchPriority::LocalOnly);
        assert_eq!(loaded.catalog.batch_size, 1);
    }
}
