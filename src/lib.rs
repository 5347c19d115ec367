//! Beacon Positioning System
//!
//! Indoor positioning from Bluetooth beacon scans, with a comparison engine
//! that measures how far the beacon estimates drift from GPS ground truth.

pub mod core;
pub mod algorithms;
pub mod registry;
pub mod tracking;
pub mod comparison;
pub mod utils;

// Re-export commonly used types
pub use crate::core::{DetectedBeaconReading, GpsFix, ReferenceBeacon, ScanCycle, TimedPosition, UserPosition};
pub use algorithms::{distance_m, Estimate, EstimatedPosition, EstimatorConfig, NoFixReason, WeightedNearestEstimator};
pub use registry::{BeaconRegistry, CatalogLoadError, CatalogParseError, LoadReport};
pub use tracking::{FeedError, GpsSender, LatestReadingStore, ReadingFeeds, ScanSender, StoreSnapshot};
pub use comparison::{
    ComparisonEngine, ComparisonOutcome, ComparisonSample, CsvReportFormatter, DivergenceResult, JsonReportFormatter,
    SamplingMode, SessionConfig, SessionError, SessionId, SessionPhase, TextReportFormatter,
};
pub use utils::{ConfigError, ConfigurationManager, SystemConfig};
