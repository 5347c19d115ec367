//! Latest-reading store
//!
//! Holds the most recent beacon estimate and the most recent GPS fix. Each
//! slot is replaced as a whole value under its own lock, so readers never see
//! a half-written position and the two writers never wait on each other.
//! Beacon updates are additionally published to subscribers, which is how a
//! per-estimate comparison session learns about new estimates.

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::core::{current_time_ms, TimedPosition, UserPosition};

/// Default capacity of the beacon update channel
pub const DEFAULT_UPDATE_CAPACITY: usize = 64;

/// Point-in-time copy of both slots
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StoreSnapshot {
    pub beacon: Option<TimedPosition>,
    pub gps: Option<TimedPosition>,
    pub taken_at_ms: u64,
}

impl StoreSnapshot {
    /// Drop slot values older than `max_age_ms` relative to the snapshot time
    pub fn without_stale(mut self, max_age_ms: u64) -> Self {
        let now = self.taken_at_ms;
        self.beacon = self.beacon.filter(|p| p.age_ms(now) <= max_age_ms);
        self.gps = self.gps.filter(|p| p.age_ms(now) <= max_age_ms);
        self
    }

    pub fn is_complete(&self) -> bool {
        self.beacon.is_some() && self.gps.is_some()
    }
}

/// Shared store of the last beacon estimate and the last GPS fix
pub struct LatestReadingStore {
    beacon: RwLock<Option<TimedPosition>>,
    gps: RwLock<Option<TimedPosition>>,
    beacon_updates: broadcast::Sender<TimedPosition>,
}

impl LatestReadingStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_UPDATE_CAPACITY)
    }

    /// Create a store whose update channel buffers `capacity` beacon updates
    pub fn with_capacity(capacity: usize) -> Self {
        let (beacon_updates, _) = broadcast::channel(capacity.max(1));
        Self {
            beacon: RwLock::new(None),
            gps: RwLock::new(None),
            beacon_updates,
        }
    }

    /// Replace the beacon slot and notify subscribers
    pub fn update_beacon(&self, position: UserPosition, updated_at_ms: u64) {
        let timed = TimedPosition::new(position, updated_at_ms);
        *self.beacon.write() = Some(timed);
        // no subscribers is fine
        let _ = self.beacon_updates.send(timed);
    }

    /// Replace the GPS slot
    pub fn update_gps(&self, position: UserPosition, updated_at_ms: u64) {
        *self.gps.write() = Some(TimedPosition::new(position, updated_at_ms));
    }

    pub fn last_beacon(&self) -> Option<TimedPosition> {
        *self.beacon.read()
    }

    pub fn last_gps(&self) -> Option<TimedPosition> {
        *self.gps.read()
    }

    /// Read both slots. Each slot is read atomically, the pair is not.
    pub fn snapshot(&self) -> StoreSnapshot {
        self.snapshot_at(current_time_ms())
    }

    pub fn snapshot_at(&self, taken_at_ms: u64) -> StoreSnapshot {
        StoreSnapshot {
            beacon: self.last_beacon(),
            gps: self.last_gps(),
            taken_at_ms,
        }
    }

    /// Pair a specific beacon estimate with the current GPS slot
    pub fn snapshot_with_beacon(&self, beacon: TimedPosition) -> StoreSnapshot {
        StoreSnapshot {
            beacon: Some(beacon),
            gps: self.last_gps(),
            taken_at_ms: current_time_ms(),
        }
    }

    /// Empty both slots
    pub fn clear(&self) {
        *self.beacon.write() = None;
        *self.gps.write() = None;
    }

    /// Receive every future beacon update; dropping the receiver unsubscribes
    pub fn subscribe_beacon_updates(&self) -> broadcast::Receiver<TimedPosition> {
        self.beacon_updates.subscribe()
    }

    /// Number of live beacon update subscribers
    pub fn subscriber_count(&self) -> usize {
        self.beacon_updates.receiver_count()
    }
}

impl Default for LatestReadingStore {
    fn default() -> Self {
        Self::new()
    }
}
