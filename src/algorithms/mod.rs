//! Core positioning algorithms

pub mod estimator;
pub mod geodesy;

pub use estimator::{Estimate, EstimatedPosition, EstimatorConfig, NoFixReason, WeightedNearestEstimator};
pub use geodesy::{distance_m, haversine_distance_m, vincenty_distance_m};
