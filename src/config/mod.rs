//! Configuration management for xcomp-capture

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Display configuration
    #[serde(default)]
    pub display: DisplayConfig,

    /// Capture loop configuration
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// X11 display, e.g. ":0"; `$DISPLAY` when unset
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Delay between refreshes in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Stop after this many frames; 0 runs until a refresh fails
    #[serde(default)]
    pub max_frames: u64,

    /// Reopen the capture when the window is resized
    #[serde(default)]
    pub reopen_on_resize: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_frames: 0,
            reopen_on_resize: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
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

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(ref name) = self.display.name {
            if name.is_empty() || name.contains('\0') {
                return Err("Display name must be a non-empty X display string".into());
            }
        }

        if self.capture.interval_ms > 60_000 {
            return Err("Capture interval cannot exceed 60000 ms".into());
        }

        if self.logging.level.parse::<log::LevelFilter>().is_err() {
            return Err(format!("Unknown log level: {}", self.logging.level).into());
        }

        Ok(())
    }
}

fn default_interval_ms() -> u64 {
    33
}

fn default_log_level() -> String {
    "info".to_string()
}
