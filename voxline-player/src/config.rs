//! Configuration for the voxline player
//!
//! Two layers:
//! 1. **TOML bootstrap** (`BootstrapConfig`): logging plus an `[engine]` table,
//!    located via `voxline_common::config` (CLI > `VOXLINE_CONFIG` > platform dir)
//! 2. **Command-line overrides**: applied by the binary on top of the file
//!
//! Every field has a built-in default, so an absent file is not an error.
//!
//! ```toml
//! [logging]
//! level = "debug"
//!
//! [engine]
//! sample_rate = 24000
//! poll_interval_ms = 100
//!
//! [engine.output]
//! device = "pulse"
//! ```

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use voxline_common::config::{load_toml, resolve_config_source, LoggingConfig, CONFIG_ENV_VAR};

/// Default PCM rate delivered by providers
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// Default queue polling interval
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Default ε added to the clock when scheduling the first buffer
pub const DEFAULT_SCHEDULE_LEAD_MS: u64 = 10;

/// Default TextChunker limit (characters)
pub const DEFAULT_MAX_CHUNK_LENGTH: usize = 9000;

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub engine: EngineConfig,
}

impl BootstrapConfig {
    /// Resolve, load and validate the configuration file.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let source = resolve_config_source(cli_path, CONFIG_ENV_VAR);
        let config: Self = load_toml(&source)?;
        config.engine.validate()?;
        Ok(config)
    }
}

/// Playback engine settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sample rate (Hz) of the mono 16-bit PCM that providers deliver
    pub sample_rate: u32,

    /// Queue loop polling interval
    ///
    /// Bounds the latency of a segment transition.
    pub poll_interval_ms: u64,

    /// Lead added to the output clock when nothing is scheduled ahead
    pub schedule_lead_ms: u64,

    /// Maximum characters per text segment
    pub max_chunk_length: usize,

    /// EventBus capacity
    pub event_capacity: usize,

    /// Output device selection
    pub output: OutputConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            schedule_lead_ms: DEFAULT_SCHEDULE_LEAD_MS,
            max_chunk_length: DEFAULT_MAX_CHUNK_LENGTH,
            event_capacity: 256,
            output: OutputConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn schedule_lead_secs(&self) -> f64 {
        self.schedule_lead_ms as f64 / 1000.0
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be greater than 0".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_chunk_length == 0 {
            return Err(Error::Config(
                "max_chunk_length must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Output device configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Device name (None = system default)
    pub device: Option<String>,

    /// Fixed device buffer size in frames (None = device default)
    pub buffer_frames: Option<u32>,
}
