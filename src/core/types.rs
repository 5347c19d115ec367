//! Core data types for the positioning system

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Geographic position in WGS84 degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UserPosition {
    pub latitude: f64,
    pub longitude: f64,
}

impl UserPosition {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Both coordinates are finite and inside the WGS84 ranges
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for UserPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(lat={:.5}, lon={:.5})", self.latitude, self.longitude)
    }
}

/// Known beacon placement from the reference catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceBeacon {
    pub id: i64,
    /// Broadcast identifier reported by the scanner
    pub uid: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub floor_id: i64,
    pub number_on_floor: i64,
    pub building_short_name: Option<String>,
    pub room_placed: bool,
    pub near_floor_change: bool,
    pub tx_power_to_set: i64,
}

impl ReferenceBeacon {
    pub fn position(&self) -> UserPosition {
        UserPosition::new(self.latitude, self.longitude)
    }
}

/// One beacon seen during a scan cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedBeaconReading {
    /// Matches `ReferenceBeacon::uid`
    pub identifier: String,
    /// Scanner's distance estimate (meters)
    pub estimated_distance_m: f64,
    pub observed_at_ms: u64,
}

impl DetectedBeaconReading {
    pub fn new(identifier: impl Into<String>, estimated_distance_m: f64) -> Self {
        Self {
            identifier: identifier.into(),
            estimated_distance_m,
            observed_at_ms: current_time_ms(),
        }
    }

    pub fn with_timestamp(mut self, observed_at_ms: u64) -> Self {
        self.observed_at_ms = observed_at_ms;
        self
    }
}

/// All readings delivered by a single scanner callback
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanCycle {
    pub readings: Vec<DetectedBeaconReading>,
    pub timestamp_ms: u64,
}

impl ScanCycle {
    pub fn new(readings: Vec<DetectedBeaconReading>) -> Self {
        Self {
            readings,
            timestamp_ms: current_time_ms(),
        }
    }

    pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }
}

/// Fix delivered by the location provider
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsFix {
    pub position: UserPosition,
    pub received_at_ms: u64,
}

impl GpsFix {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            position: UserPosition::new(latitude, longitude),
            received_at_ms: current_time_ms(),
        }
    }

    pub fn with_timestamp(mut self, received_at_ms: u64) -> Self {
        self.received_at_ms = received_at_ms;
        self
    }
}

/// Position paired with the time it arrived in its slot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedPosition {
    pub position: UserPosition,
    pub updated_at_ms: u64,
}

impl TimedPosition {
    pub fn new(position: UserPosition, updated_at_ms: u64) -> Self {
        Self { position, updated_at_ms }
    }

    /// Age relative to `now_ms`, zero if the value is from the future
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.updated_at_ms)
    }
}

/// Milliseconds since the Unix epoch
pub fn current_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_validity() {
        assert!(UserPosition::new(52.22, 21.01).is_valid());
        assert!(!UserPosition::new(91.0, 0.0).is_valid());
        assert!(!UserPosition::new(0.0, f64::NAN).is_valid());
    }

    #[test]
    fn test_timed_position_age() {
        let timed = TimedPosition::new(UserPosition::new(0.0, 0.0), 1_000);
        assert_eq!(timed.age_ms(1_500), 500);
        assert_eq!(timed.age_ms(900), 0);
    }
}
