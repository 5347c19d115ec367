//! Physical constants and algorithm defaults

/// Number of nearest matched beacons used by the estimator
pub const DEFAULT_NEAREST_BEACONS: usize = 5;

/// Distance floor applied before inverting a reading into a weight (meters)
pub const MIN_WEIGHT_DISTANCE_M: f64 = 0.1;

/// Mean Earth radius used by the haversine formula (meters)
pub const EARTH_MEAN_RADIUS_M: f64 = 6_371_008.8;

/// WGS84 semi-major axis (meters)
pub const WGS84_SEMI_MAJOR_AXIS_M: f64 = 6_378_137.0;

/// WGS84 flattening
pub const WGS84_FLATTENING: f64 = 1.0 / 298.257_223_563;

/// Sampling period of a fixed-tick comparison session (milliseconds)
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;

/// Length of a comparison session (seconds)
pub const DEFAULT_SESSION_DURATION_SECS: u64 = 60;

/// Number of largest divergences reported
pub const DEFAULT_TOP_N: usize = 5;
