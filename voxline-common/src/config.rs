//! Configuration file resolution and loading
//!
//! Configuration sources, highest priority first:
//! 1. Command-line argument (`--config <path>`)
//! 2. Environment variable (`VOXLINE_CONFIG`)
//! 3. Platform config directory (`<config_dir>/voxline/voxline.toml`)
//! 4. Compiled defaults
//!
//! A missing file at priority 3 is not an error: the caller gets defaults.
//! An explicitly named file (priorities 1 and 2) that cannot be read is.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "VOXLINE_CONFIG";

/// File name looked up in the platform config directory
pub const CONFIG_FILE_NAME: &str = "voxline.toml";

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Where a configuration file path came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    CommandLine(PathBuf),
    Environment(PathBuf),
    PlatformDefault(PathBuf),
    CompiledDefaults,
}

impl ConfigSource {
    /// Path to read, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::CommandLine(p)
            | ConfigSource::Environment(p)
            | ConfigSource::PlatformDefault(p) => Some(p),
            ConfigSource::CompiledDefaults => None,
        }
    }

    fn is_explicit(&self) -> bool {
        matches!(
            self,
            ConfigSource::CommandLine(_) | ConfigSource::Environment(_)
        )
    }
}

/// Resolve which configuration file to use.
///
/// # Arguments
/// - `cli_arg`: path given on the command line, if any
/// - `env_var_name`: environment variable consulted when no CLI path is given
pub fn resolve_config_source(cli_arg: Option<&Path>, env_var_name: &str) -> ConfigSource {
    if let Some(path) = cli_arg {
        return ConfigSource::CommandLine(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return ConfigSource::Environment(PathBuf::from(path));
        }
    }

    match default_config_path() {
        Some(path) if path.exists() => ConfigSource::PlatformDefault(path),
        _ => ConfigSource::CompiledDefaults,
    }
}

/// Platform config file location (`~/.config/voxline/voxline.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("voxline").join(CONFIG_FILE_NAME))
}

/// Load a TOML configuration of type `T` from the resolved source.
///
/// Returns `T::default()` when the source is `CompiledDefaults`.
///
/// # Errors
/// - `Error::Config` if an explicitly named file does not exist
/// - `Error::Io` if the file exists but cannot be read
/// - `Error::TomlParse` if the file is not valid for `T`
pub fn load_toml<T>(source: &ConfigSource) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let path = match source.path() {
        Some(path) => path,
        None => {
            info!("No configuration file found, using compiled defaults");
            return Ok(T::default());
        }
    };

    if !path.exists() {
        if source.is_explicit() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)?;
    let parsed = toml::from_str::<T>(&content).map_err(|source| Error::TomlParse {
        path: path.display().to_string(),
        source,
    })?;

    debug!("Loaded configuration from {}", path.display());
    Ok(parsed)
}
