//! Comparison samples recorded during a session

use serde::{Deserialize, Serialize};

use crate::core::UserPosition;
use crate::tracking::StoreSnapshot;

/// One time-aligned pair of beacon estimate and GPS fix.
///
/// Either side may be missing. `difference_m` stays `None` until analysis and
/// remains `None` for incomplete samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSample {
    /// Recording order within the session
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub beacon_position: Option<UserPosition>,
    pub gps_position: Option<UserPosition>,
    /// When the captured beacon estimate arrived in the store
    pub beacon_updated_at_ms: Option<u64>,
    /// When the captured GPS fix arrived in the store
    pub gps_updated_at_ms: Option<u64>,
    pub difference_m: Option<f64>,
}

impl ComparisonSample {
    pub fn new(
        sequence: u64,
        timestamp_ms: u64,
        beacon_position: Option<UserPosition>,
        gps_position: Option<UserPosition>,
    ) -> Self {
        Self {
            sequence,
            timestamp_ms,
            beacon_position,
            gps_position,
            beacon_updated_at_ms: None,
            gps_updated_at_ms: None,
            difference_m: None,
        }
    }

    /// Capture both store slots as they were at snapshot time
    pub fn from_snapshot(sequence: u64, snapshot: &StoreSnapshot) -> Self {
        Self {
            sequence,
            timestamp_ms: snapshot.taken_at_ms,
            beacon_position: snapshot.beacon.map(|b| b.position),
            gps_position: snapshot.gps.map(|g| g.position),
            beacon_updated_at_ms: snapshot.beacon.map(|b| b.updated_at_ms),
            gps_updated_at_ms: snapshot.gps.map(|g| g.updated_at_ms),
            difference_m: None,
        }
    }

    /// Both positions present
    pub fn is_comparable(&self) -> bool {
        self.beacon_position.is_some() && self.gps_position.is_some()
    }

    /// Time between the two captured readings, if both are present
    pub fn source_skew_ms(&self) -> Option<u64> {
        match (self.beacon_updated_at_ms, self.gps_updated_at_ms) {
            (Some(beacon), Some(gps)) => Some(beacon.abs_diff(gps)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TimedPosition;

    #[test]
    fn test_from_partial_snapshot() {
        let snapshot = StoreSnapshot {
            beacon: None,
            gps: Some(TimedPosition::new(UserPosition::new(52.0, 21.0), 900)),
            taken_at_ms: 1_000,
        };
        let sample = ComparisonSample::from_snapshot(3, &snapshot);

        assert_eq!(sample.sequence, 3);
        assert_eq!(sample.timestamp_ms, 1_000);
        assert!(!sample.is_comparable());
        assert_eq!(sample.gps_updated_at_ms, Some(900));
        assert_eq!(sample.source_skew_ms(), None);
        assert!(sample.difference_m.is_none());
    }

    #[test]
    fn test_source_skew() {
        let snapshot = StoreSnapshot {
            beacon: Some(TimedPosition::new(UserPosition::new(52.0, 21.0), 700)),
            gps: Some(TimedPosition::new(UserPosition::new(52.0, 21.0), 950)),
            taken_at_ms: 1_000,
        };
        let sample = ComparisonSample::from_snapshot(0, &snapshot);
        assert!(sample.is_comparable());
        assert_eq!(sample.source_skew_ms(), Some(250));
    }
}
