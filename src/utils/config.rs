use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::algorithms::EstimatorConfig;
use crate::comparison::{SamplingMode, SessionConfig};
use crate::core::{DEFAULT_SESSION_DURATION_SECS, DEFAULT_TICK_INTERVAL_MS, DEFAULT_TOP_N};

/// System-wide configuration parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Position estimator settings
    pub estimator: EstimatorConfig,
    /// Comparison session defaults
    pub comparison: ComparisonConfig,
    /// Reference beacon catalog (JSON document with an `items` array)
    pub catalog_path: Option<PathBuf>,
    /// Log filter used when `RUST_LOG` is not set
    pub log_level: String,
}

/// Comparison session defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonConfig {
    pub mode: SamplingMode,
    /// Session length in seconds, `None` runs until stopped
    pub duration_secs: Option<u64>,
    /// Sampling period in fixed-tick mode (milliseconds)
    pub tick_interval_ms: u64,
    /// Number of largest divergences to report
    pub top_n: usize,
    /// Store values older than this are treated as missing (milliseconds)
    pub max_reading_age_ms: Option<u64>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            estimator: EstimatorConfig::default(),
            comparison: ComparisonConfig::default(),
            catalog_path: None,
            log_level: "info".to_string(),
        }
    }
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            mode: SamplingMode::FixedTick,
            duration_secs: Some(DEFAULT_SESSION_DURATION_SECS),
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            top_n: DEFAULT_TOP_N,
            max_reading_age_ms: None,
        }
    }
}

impl ComparisonConfig {
    /// Session parameters for the comparison engine
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            mode: self.mode,
            duration: self.duration_secs.map(Duration::from_secs),
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            top_n: self.top_n,
            max_reading_age: self.max_reading_age_ms.map(Duration::from_millis),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {parameter} = {value}: {reason}")]
    InvalidParameter { parameter: String, value: String, reason: String },
    #[error("failed to access config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config document: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("no file path set for saving configuration")]
    NoFilePath,
}

impl ConfigError {
    fn invalid(parameter: &str, value: impl ToString, reason: &str) -> Self {
        ConfigError::InvalidParameter {
            parameter: parameter.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Configuration validation result
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Whether configuration is valid
    pub is_valid: bool,
    pub errors: Vec<ConfigError>,
    pub warnings: Vec<String>,
}

/// Main configuration manager
#[derive(Debug, Default)]
pub struct ConfigurationManager {
    system_config: SystemConfig,
    config_file_path: Option<PathBuf>,
    is_modified: bool,
}

impl ConfigurationManager {
    /// Create a new configuration manager with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration manager and load from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut manager = Self::new();
        manager.load_from_file(path)?;
        Ok(manager)
    }

    pub fn get_system_config(&self) -> &SystemConfig {
        &self.system_config
    }

    /// Replace the whole configuration if it validates
    pub fn update_system_config(&mut self, config: SystemConfig) -> Result<(), ConfigError> {
        Self::first_error(Self::validate_system_config(&config))?;
        self.system_config = config;
        self.is_modified = true;
        Ok(())
    }

    /// Load configuration from a JSON file. Missing fields take their defaults.
    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: SystemConfig = serde_json::from_str(&content)?;
        Self::first_error(Self::validate_system_config(&config))?;

        self.system_config = config;
        self.config_file_path = Some(path.to_path_buf());
        self.is_modified = false;
        Ok(())
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(&self.system_config)?;
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        self.config_file_path = Some(path.to_path_buf());
        self.is_modified = false;
        Ok(())
    }

    /// Save to the currently loaded file path
    pub fn save(&mut self) -> Result<(), ConfigError> {
        match self.config_file_path.clone() {
            Some(path) => self.save_to_file(path),
            None => Err(ConfigError::NoFilePath),
        }
    }

    pub fn is_modified(&self) -> bool {
        self.is_modified
    }

    pub fn config_file_path(&self) -> Option<&Path> {
        self.config_file_path.as_deref()
    }

    pub fn validate_system_config(config: &SystemConfig) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let estimator = &config.estimator;
        if estimator.nearest_beacons == 0 {
            errors.push(ConfigError::invalid(
                "estimator.nearest_beacons",
                estimator.nearest_beacons,
                "at least one beacon is needed for a position",
            ));
        } else if estimator.nearest_beacons > 50 {
            warnings.push(format!(
                "estimator.nearest_beacons = {} will average beacons far from the user",
                estimator.nearest_beacons
            ));
        }
        if !(estimator.min_distance_m.is_finite() && estimator.min_distance_m > 0.0) {
            errors.push(ConfigError::invalid(
                "estimator.min_distance_m",
                estimator.min_distance_m,
                "distance floor must be positive",
            ));
        }

        let comparison = &config.comparison;
        if comparison.top_n == 0 {
            errors.push(ConfigError::invalid("comparison.top_n", comparison.top_n, "must be at least 1"));
        }
        if comparison.duration_secs == Some(0) {
            errors.push(ConfigError::invalid(
                "comparison.duration_secs",
                0,
                "session duration must be positive",
            ));
        }
        if comparison.mode == SamplingMode::FixedTick {
            if comparison.tick_interval_ms == 0 {
                errors.push(ConfigError::invalid(
                    "comparison.tick_interval_ms",
                    0,
                    "tick interval must be positive",
                ));
            } else if let Some(duration_secs) = comparison.duration_secs {
                if duration_secs.saturating_mul(1_000) < comparison.tick_interval_ms {
                    warnings.push(format!(
                        "session of {duration_secs} s is shorter than one {} ms tick and records no samples",
                        comparison.tick_interval_ms
                    ));
                }
            }
        }
        if comparison.max_reading_age_ms == Some(0) {
            warnings.push("comparison.max_reading_age_ms = 0 treats every reading as stale".to_string());
        }

        if config.log_level.trim().is_empty() {
            errors.push(ConfigError::invalid("log_level", "\"\"", "log filter must not be empty"));
        }
        if config.catalog_path.is_none() {
            warnings.push("no catalog_path configured; every scan will yield no fix".to_string());
        }

        ValidationResult {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    fn first_error(validation: ValidationResult) -> Result<(), ConfigError> {
        match validation.errors.into_iter().next() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    // Runtime parameter adjustment; setters return the previous value

    pub fn set_nearest_beacons(&mut self, k: usize) -> Result<usize, ConfigError> {
        if k == 0 {
            return Err(ConfigError::invalid(
                "estimator.nearest_beacons",
                k,
                "at least one beacon is needed for a position",
            ));
        }
        let old_value = std::mem::replace(&mut self.system_config.estimator.nearest_beacons, k);
        self.is_modified = true;
        Ok(old_value)
    }

    pub fn set_min_weight_distance(&mut self, distance_m: f64) -> Result<f64, ConfigError> {
        if !(distance_m.is_finite() && distance_m > 0.0) {
            return Err(ConfigError::invalid(
                "estimator.min_distance_m",
                distance_m,
                "distance floor must be positive",
            ));
        }
        let old_value = std::mem::replace(&mut self.system_config.estimator.min_distance_m, distance_m);
        self.is_modified = true;
        Ok(old_value)
    }

    pub fn set_sampling_mode(&mut self, mode: SamplingMode) -> SamplingMode {
        self.is_modified = true;
        std::mem::replace(&mut self.system_config.comparison.mode, mode)
    }

    pub fn set_session_duration(&mut self, duration_secs: Option<u64>) -> Result<Option<u64>, ConfigError> {
        if duration_secs == Some(0) {
            return Err(ConfigError::invalid(
                "comparison.duration_secs",
                0,
                "session duration must be positive",
            ));
        }
        let old_value = std::mem::replace(&mut self.system_config.comparison.duration_secs, duration_secs);
        self.is_modified = true;
        Ok(old_value)
    }

    pub fn set_tick_interval(&mut self, interval_ms: u64) -> Result<u64, ConfigError> {
        if interval_ms == 0 {
            return Err(ConfigError::invalid(
                "comparison.tick_interval_ms",
                0,
                "tick interval must be positive",
            ));
        }
        let old_value = std::mem::replace(&mut self.system_config.comparison.tick_interval_ms, interval_ms);
        self.is_modified = true;
        Ok(old_value)
    }

    pub fn set_top_n(&mut self, top_n: usize) -> Result<usize, ConfigError> {
        if top_n == 0 {
            return Err(ConfigError::invalid("comparison.top_n", 0, "must be at least 1"));
        }
        let old_value = std::mem::replace(&mut self.system_config.comparison.top_n, top_n);
        self.is_modified = true;
        Ok(old_value)
    }

    pub fn set_max_reading_age(&mut self, max_age_ms: Option<u64>) -> Option<u64> {
        self.is_modified = true;
        std::mem::replace(&mut self.system_config.comparison.max_reading_age_ms, max_age_ms)
    }

    pub fn set_catalog_path(&mut self, path: Option<PathBuf>) -> Option<PathBuf> {
        self.is_modified = true;
        std::mem::replace(&mut self.system_config.catalog_path, path)
    }

    pub fn set_log_level(&mut self, level: &str) -> Result<String, ConfigError> {
        if level.trim().is_empty() {
            return Err(ConfigError::invalid("log_level", "\"\"", "log filter must not be empty"));
        }
        let old_value = std::mem::replace(&mut self.system_config.log_level, level.to_string());
        self.is_modified = true;
        Ok(old_value)
    }
}
