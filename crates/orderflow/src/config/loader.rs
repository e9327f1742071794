use std::path::Path;

use tracing::info;

use crate::config::schema::AppConfig;
use crate::error::ConfigError;
use crate::order::Website;
use crate::tagger::TaggerProvider;

/// Loads the application config, writing a default one first if the file
/// does not exist yet.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig, ConfigError> {
    let path = path.as_ref();

    if !path.exists() {
        write_default_config(path)?;
        info!("Wrote default config to {}", path.display());
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_json::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

fn write_default_config(path: &Path) -> Result<(), ConfigError> {
    let write_err = |e| ConfigError::WriteDefault {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }

    let json = serde_json::to_string_pretty(&AppConfig::default())?;
    std::fs::write(path, json).map_err(write_err)
}

pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if TaggerProvider::from_name(&config.tagger.provider).is_none() {
        return Err(ConfigError::Validation {
            message: format!("Unsupported tagger provider: {}", config.tagger.provider),
        });
    }

    for name in config.uploader.sites.keys() {
        if Website::from_name(name).is_none() {
            return Err(ConfigError::Validation {
                message: format!("Unknown upload site in uploader.sites: {}", name),
            });
        }
    }

    if config.backend.poll_interval_ms == 0 {
        return Err(ConfigError::Validation {
            message: "backend.poll_interval_ms must be greater than 0".to_string(),
        });
    }

    if config.post_process.mosaic_factor == 0 {
        return Err(ConfigError::Validation {
            message: "post_process.mosaic_factor must be greater than 0".to_string(),
        });
    }

    Ok(())
}
