//! Configuration loader

use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use config::builder::DefaultState;
use std::path::Path;

use super::types::AppConfig;
use crate::common::errors::{RebalanceError, RebalanceResult};

/// Load configuration from file and environment variables
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with APP__, `__` between sections)
/// 2. Configuration file (TOML format)
/// 3. Default values
pub fn load_config(config_path: Option<&str>) -> RebalanceResult<AppConfig> {
    let mut builder = Config::builder();

    if let Some(path) = config_path {
        if Path::new(path).exists() {
            builder = builder.add_source(File::with_name(path).required(false));
        }
    }

    finish(with_env(builder))
}

/// Load configuration from an inline TOML document plus the environment
pub fn load_config_from_str(toml: &str) -> RebalanceResult<AppConfig> {
    let builder = Config::builder().add_source(File::from_str(toml, FileFormat::Toml));
    finish(with_env(builder))
}

fn with_env(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix("APP")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    )
}

fn finish(builder: ConfigBuilder<DefaultState>) -> RebalanceResult<AppConfig> {
    let config: AppConfig = builder
        .build()
        .map_err(|e| RebalanceError::Configuration(e.to_string()))?
        .try_deserialize()
        .map_err(|e| RebalanceError::Configuration(e.to_string()))?;

    config.validate()?;
    Ok(config)
}
