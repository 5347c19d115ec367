//! Utility modules for configuration and logging

pub mod config;
pub mod logging;

pub use config::{ComparisonConfig, ConfigError, ConfigurationManager, SystemConfig, ValidationResult};
pub use logging::init_logging;
