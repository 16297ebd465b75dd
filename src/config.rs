//! Service configuration.
//!
//! Settings come from a TOML file (every field optional, with defaults) and
//! are then overridden by environment variables, which may themselves be
//! supplied through a `.env` file.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::logging::LogLevel;

pub const DEFAULT_CONFIG_PATH: &str = "ridership.toml";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config: {}", e),
            ConfigError::Parse(msg) => write!(f, "Parse error in config: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the ridership query service.
    pub base_url: String,
    /// Per-request timeout; 0 leaves requests unbounded, so a slow but valid
    /// answer is never turned into a failure.
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            timeout_secs: 0,
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Delay before a loading wave is shown for a slow fetch.
    pub grace_ms: u64,
    /// Memoized fetch results kept by the coordinator. 0 disables memoizing.
    pub cache_capacity: usize,
    pub frame_interval_ms: u64,
    pub transition_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            grace_ms: 50,
            cache_capacity: 32,
            frame_interval_ms: 16,
            transition_ms: 1000,
        }
    }
}

impl PipelineConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

/// Tuning for the wave loading animations and bar heights.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    /// Wave cycles per millisecond; 0.0005 sweeps the map every two seconds.
    pub wave_speed: f64,
    /// Pulse half-width as a fraction of the normalized sweep.
    pub wave_width: f64,
    pub min_pulse: f64,
    pub max_pulse: f64,
    /// Rendered height of a bar whose scaled value is 1.0.
    pub height_unit: f64,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            wave_speed: 0.0005,
            wave_width: 0.15,
            min_pulse: 0.0,
            max_pulse: 1.0,
            height_unit: 1000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            timestamps: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub catalog_path: String,
    pub backend: BackendConfig,
    pub pipeline: PipelineConfig,
    pub animation: AnimationConfig,
    pub logging: LoggingConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            catalog_path: "stations.toml".to_string(),
            backend: BackendConfig::default(),
            pipeline: PipelineConfig::default(),
            animation: AnimationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise, then apply environment
    /// overrides (after reading `.env`).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let path = path.as_ref();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
            Self::from_toml_str(&text)?
        } else {
            ServiceConfig::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `RIDERSHIP_*` overrides from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("RIDERSHIP_API_URL") {
            self.backend.base_url = url;
        }
        if let Some(level) = lookup("RIDERSHIP_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(file) = lookup("RIDERSHIP_LOG_FILE") {
            self.logging.file = Some(file);
        }
        if let Some(catalog) = lookup("RIDERSHIP_CATALOG") {
            self.catalog_path = catalog;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let anim = &self.animation;
        if !(anim.wave_speed > 0.0) {
            return Err(ConfigError::Invalid("animation.wave_speed must be positive".into()));
        }
        if !(anim.wave_width > 0.0) {
            return Err(ConfigError::Invalid("animation.wave_width must be positive".into()));
        }
        if anim.max_pulse < anim.min_pulse {
            return Err(ConfigError::Invalid(
                "animation.max_pulse must not be below min_pulse".into(),
            ));
        }
        if self.pipeline.frame_interval_ms == 0 {
            return Err(ConfigError::Invalid("pipeline.frame_interval_ms must be at least 1".into()));
        }
        self.log_level()?;
        Ok(())
    }

    pub fn log_level(&self) -> Result<LogLevel, ConfigError> {
        self.logging.level.parse().map_err(ConfigError::Invalid)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
