// src/config/loader.rs

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use config::{Config, Environment, File};
use std::path::Path;
use tracing::{debug, info};

/// Prefix of environment overrides, e.g. `PROXY_HEALTHCHECK_PROBE__PROXY_ADDR`.
pub const ENV_PREFIX: &str = "PROXY_HEALTHCHECK";

/// Load configuration from an optional file, then environment variables.
///
/// Nothing is validated here; command-line overrides still have to be
/// applied on top before [`ConfigValidator`](crate::config::ConfigValidator) runs.
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig> {
    let mut builder = Config::builder();

    if let Some(path) = config_path {
        if !path.exists() {
            return Err(AppError::ConfigParse {
                message: format!("Configuration file not found: {}", path.display()),
            });
        }
        info!(config.path = %path.display(), "Loading configuration from file");
        builder = builder.add_source(File::from(path).required(true));
    } else {
        debug!("No configuration file given, using defaults and environment");
    }

    let config: AppConfig = builder.add_source(env_source()).build()?.try_deserialize()?;

    debug!(
        urls = config.probe.urls.len(),
        auth_types = config.probe.auth_types.len(),
        proxy = %config.probe.proxy_addr,
        "Configuration loaded"
    );
    Ok(config)
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("probe.urls")
        .with_list_parse_key("probe.auth_types")
        .try_parsing(true)
}
