//! Weighted nearest-neighbour position estimation
//!
//! Converts one scan cycle worth of detected beacons into a single coordinate:
//! readings are matched against the registry, the `K` closest matches are
//! kept and their reference positions are averaged with inverse-distance
//! weights. The result is always a convex combination of the selected
//! reference positions.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use tracing::trace;

use crate::core::{
    DetectedBeaconReading, ReferenceBeacon, UserPosition, DEFAULT_NEAREST_BEACONS, MIN_WEIGHT_DISTANCE_M,
};
use crate::registry::BeaconRegistry;

/// Estimator parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Number of nearest matched beacons to average (K)
    pub nearest_beacons: usize,
    /// Distance floor before inverting into a weight (meters)
    pub min_distance_m: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            nearest_beacons: DEFAULT_NEAREST_BEACONS,
            min_distance_m: MIN_WEIGHT_DISTANCE_M,
        }
    }
}

/// Why no position could be produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoFixReason {
    /// None of the detected identifiers is in the registry
    NoMatchingBeacons,
    /// Selected weights summed to zero
    ZeroWeight,
}

impl fmt::Display for NoFixReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoFixReason::NoMatchingBeacons => write!(f, "no detected beacon matches the catalog"),
            NoFixReason::ZeroWeight => write!(f, "beacon weights sum to zero"),
        }
    }
}

/// Position produced from a scan cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatedPosition {
    pub position: UserPosition,
    /// Beacons that contributed to the centroid
    pub beacons_used: usize,
    /// Readings that matched the registry before selection
    pub matched: usize,
    /// Distance of the closest selected reading (meters)
    pub nearest_distance_m: f64,
}

/// Result of one estimation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Estimate {
    Fix(EstimatedPosition),
    NoFix(NoFixReason),
}

impl Estimate {
    pub fn position(&self) -> Option<UserPosition> {
        match self {
            Estimate::Fix(fix) => Some(fix.position),
            Estimate::NoFix(_) => None,
        }
    }

    pub fn is_fix(&self) -> bool {
        matches!(self, Estimate::Fix(_))
    }
}

/// Inverse-distance-weighted centroid of the nearest matched beacons
#[derive(Debug, Clone, Default)]
pub struct WeightedNearestEstimator {
    config: EstimatorConfig,
}

impl WeightedNearestEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }

    /// Estimator using `k` nearest beacons and the default distance floor
    pub fn with_nearest(k: usize) -> Self {
        Self::new(EstimatorConfig {
            nearest_beacons: k,
            ..EstimatorConfig::default()
        })
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Weight contributed by a reading at `distance_m`
    pub fn weight(&self, distance_m: f64) -> f64 {
        1.0 / distance_m.max(self.config.min_distance_m)
    }

    /// Estimate the user position from a snapshot of detected readings
    pub fn estimate(&self, readings: &[DetectedBeaconReading], registry: &BeaconRegistry) -> Estimate {
        let mut matched: Vec<(&ReferenceBeacon, f64)> = readings
            .iter()
            .filter(|r| r.estimated_distance_m.is_finite() && r.estimated_distance_m >= 0.0)
            .filter_map(|r| registry.lookup(&r.identifier).map(|beacon| (beacon, r.estimated_distance_m)))
            .collect();

        if matched.is_empty() {
            trace!(readings = readings.len(), "No detected beacon matched the registry");
            return Estimate::NoFix(NoFixReason::NoMatchingBeacons);
        }

        let matched_count = matched.len();
        matched.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        matched.truncate(self.config.nearest_beacons);

        let mut weighted_sum = Vector2::<f64>::zeros();
        let mut weight_sum = 0.0;
        for (beacon, distance_m) in &matched {
            let weight = self.weight(*distance_m);
            weighted_sum += Vector2::new(beacon.latitude, beacon.longitude) * weight;
            weight_sum += weight;
        }

        if weight_sum == 0.0 || !weight_sum.is_finite() {
            return Estimate::NoFix(NoFixReason::ZeroWeight);
        }

        let position = if matched.len() == 1 {
            matched[0].0.position()
        } else {
            let centroid = weighted_sum / weight_sum;
            clamp_to_bounds(UserPosition::new(centroid.x, centroid.y), &matched)
        };

        let fix = EstimatedPosition {
            position,
            beacons_used: matched.len(),
            matched: matched_count,
            nearest_distance_m: matched[0].1,
        };

        trace!(
            lat = fix.position.latitude,
            lon = fix.position.longitude,
            beacons_used = fix.beacons_used,
            matched = fix.matched,
            "Estimated position"
        );

        Estimate::Fix(fix)
    }
}

/// Keep rounding error from pushing the centroid outside the selected beacons
fn clamp_to_bounds(position: UserPosition, selected: &[(&ReferenceBeacon, f64)]) -> UserPosition {
    let (mut min_lat, mut max_lat) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut min_lon, mut max_lon) = (f64::INFINITY, f64::NEG_INFINITY);
    for (beacon, _) in selected {
        min_lat = min_lat.min(beacon.latitude);
        max_lat = max_lat.max(beacon.latitude);
        min_lon = min_lon.min(beacon.longitude);
        max_lon = max_lon.max(beacon.longitude);
    }

    UserPosition::new(
        position.latitude.clamp(min_lat, max_lat),
        position.longitude.clamp(min_lon, max_lon),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(uid: &str, lat: f64, lon: f64) -> ReferenceBeacon {
        ReferenceBeacon {
            id: 0,
            uid: Some(uid.to_string()),
            latitude: lat,
            longitude: lon,
            floor_id: 0,
            number_on_floor: 0,
            building_short_name: None,
            room_placed: false,
            near_floor_change: false,
            tx_power_to_set: 0,
        }
    }

    fn registry(beacons: &[(&str, f64, f64)]) -> BeaconRegistry {
        BeaconRegistry::from_beacons(beacons.iter().map(|(uid, lat, lon)| reference(uid, *lat, *lon))).0
    }

    fn readings(pairs: &[(&str, f64)]) -> Vec<DetectedBeaconReading> {
        pairs
            .iter()
            .map(|(id, d)| DetectedBeaconReading::new(*id, *d).with_timestamp(0))
            .collect()
    }

    #[test]
    fn test_three_beacon_scenario() {
        let registry = registry(&[("a", 0.0, 0.0), ("b", 0.0, 2.0), ("c", 0.0, 4.0)]);
        let estimator = WeightedNearestEstimator::with_nearest(3);

        let estimate = estimator.estimate(&readings(&[("a", 1.0), ("b", 1.0), ("c", 2.0)]), &registry);
        let position = estimate.position().unwrap();

        assert!(position.latitude.abs() < 1e-12);
        assert!((position.longitude - 1.6).abs() < 1e-12);
    }

    #[test]
    fn test_single_match_returns_beacon_position() {
        let registry = registry(&[("only", 52.2297, 21.0117), ("far", 50.0, 19.0)]);
        let estimator = WeightedNearestEstimator::default();

        let estimate = estimator.estimate(&readings(&[("only", 3.7), ("ghost", 0.5)]), &registry);
        assert_eq!(estimate.position(), Some(UserPosition::new(52.2297, 21.0117)));
    }

    #[test]
    fn test_no_match_is_no_fix() {
        let registry = registry(&[("a", 1.0, 1.0)]);
        let estimator = WeightedNearestEstimator::default();

        assert_eq!(
            estimator.estimate(&readings(&[("x", 1.0)]), &registry),
            Estimate::NoFix(NoFixReason::NoMatchingBeacons)
        );
        assert_eq!(
            estimator.estimate(&[], &registry),
            Estimate::NoFix(NoFixReason::NoMatchingBeacons)
        );
    }

    #[test]
    fn test_zero_distance_weight_floor() {
        let estimator = WeightedNearestEstimator::default();
        assert_eq!(estimator.weight(0.0), 10.0);
        assert_eq!(estimator.weight(0.05), 10.0);
        assert_eq!(estimator.weight(2.0), 0.5);

        // zero distance against a 1 m reading: weights 10 and 1
        let registry = registry(&[("a", 0.0, 0.0), ("b", 0.0, 11.0)]);
        let position = estimator
            .estimate(&readings(&[("a", 0.0), ("b", 1.0)]), &registry)
            .position()
            .unwrap();
        assert!((position.longitude - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_result_within_bounding_box_of_selected() {
        let registry = registry(&[
            ("a", 52.0, 21.0),
            ("b", 52.001, 21.004),
            ("c", 52.003, 21.001),
            ("d", 51.999, 21.002),
            ("e", 52.002, 20.998),
            ("f", 60.0, 30.0),
        ]);
        let estimator = WeightedNearestEstimator::with_nearest(5);
        let scan = readings(&[("a", 2.5), ("b", 0.3), ("c", 7.0), ("d", 1.1), ("e", 4.2), ("f", 40.0)]);

        let position = estimator.estimate(&scan, &registry).position().unwrap();
        assert!(position.latitude >= 51.999 && position.latitude <= 52.003);
        assert!(position.longitude >= 20.998 && position.longitude <= 21.004);
    }

    #[test]
    fn test_worse_matches_do_not_change_result() {
        let registry = registry(&[
            ("a", 1.0, 1.0),
            ("b", 2.0, 1.5),
            ("c", 1.5, 3.0),
            ("d", 9.0, 9.0),
            ("e", -4.0, 7.0),
        ]);
        let estimator = WeightedNearestEstimator::with_nearest(3);

        let base = estimator.estimate(&readings(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]), &registry);
        let extended = estimator.estimate(
            &readings(&[("d", 3.5), ("a", 1.0), ("e", 12.0), ("b", 2.0), ("c", 3.0)]),
            &registry,
        );
        assert_eq!(base.position(), extended.position());
        assert_eq!(fix_of(&extended).matched, 5);
        assert_eq!(fix_of(&extended).beacons_used, 3);
    }

    #[test]
    fn test_invalid_distances_discarded() {
        let registry = registry(&[("a", 1.0, 1.0), ("b", 5.0, 5.0)]);
        let estimator = WeightedNearestEstimator::default();

        let estimate = estimator.estimate(&readings(&[("a", 2.0), ("b", f64::NAN), ("b", -1.0)]), &registry);
        assert_eq!(estimate.position(), Some(UserPosition::new(1.0, 1.0)));
    }

    fn fix_of(estimate: &Estimate) -> EstimatedPosition {
        match estimate {
            Estimate::Fix(fix) => *fix,
            Estimate::NoFix(reason) => panic!("expected a fix, got {reason}"),
        }
    }
}
