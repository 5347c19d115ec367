//! Reading feeds
//!
//! The scanner and the location provider each push immutable values into
//! their own bounded channel. Two ingest tasks drain the channels: the scan
//! task runs the estimator on the blocking pool and writes the beacon slot,
//! the GPS task writes the GPS slot. Neither producer ever waits on the other.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::store::LatestReadingStore;
use crate::algorithms::{Estimate, WeightedNearestEstimator};
use crate::core::{GpsFix, ScanCycle};
use crate::registry::BeaconRegistry;

/// Default buffer size of each producer channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// Errors returned to producers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("feed has been stopped")]
    Closed,
    #[error("feed channel is full")]
    Full,
}

impl<T> From<mpsc::error::TrySendError<T>> for FeedError {
    fn from(error: mpsc::error::TrySendError<T>) -> Self {
        match error {
            mpsc::error::TrySendError::Full(_) => FeedError::Full,
            mpsc::error::TrySendError::Closed(_) => FeedError::Closed,
        }
    }
}

/// Producer handle for the beacon scanner
#[derive(Debug, Clone)]
pub struct ScanSender {
    tx: mpsc::Sender<ScanCycle>,
}

impl ScanSender {
    /// Queue a scan cycle, waiting for buffer space
    pub async fn send(&self, cycle: ScanCycle) -> Result<(), FeedError> {
        self.tx.send(cycle).await.map_err(|_| FeedError::Closed)
    }

    /// Queue a scan cycle without waiting; for scanner callbacks on foreign threads
    pub fn try_send(&self, cycle: ScanCycle) -> Result<(), FeedError> {
        self.tx.try_send(cycle).map_err(FeedError::from)
    }
}

/// Producer handle for the location provider
#[derive(Debug, Clone)]
pub struct GpsSender {
    tx: mpsc::Sender<GpsFix>,
}

impl GpsSender {
    pub async fn send(&self, fix: GpsFix) -> Result<(), FeedError> {
        self.tx.send(fix).await.map_err(|_| FeedError::Closed)
    }

    pub fn try_send(&self, fix: GpsFix) -> Result<(), FeedError> {
        self.tx.try_send(fix).map_err(FeedError::from)
    }
}

/// Counters maintained by the ingest tasks
#[derive(Debug, Default)]
struct FeedCounters {
    scans_received: AtomicU64,
    beacon_fixes: AtomicU64,
    no_fix: AtomicU64,
    gps_received: AtomicU64,
    gps_rejected: AtomicU64,
}

/// Copy of the feed counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub scans_received: u64,
    pub beacon_fixes: u64,
    pub no_fix: u64,
    pub gps_received: u64,
    pub gps_rejected: u64,
}

/// Running scanner and GPS ingestion
pub struct ReadingFeeds {
    cancellation: CancellationToken,
    scan_task: Option<JoinHandle<()>>,
    gps_task: Option<JoinHandle<()>>,
    counters: Arc<FeedCounters>,
}

impl ReadingFeeds {
    /// Start both ingest tasks with default channel sizes
    pub fn spawn(
        registry: Arc<BeaconRegistry>,
        estimator: Arc<WeightedNearestEstimator>,
        store: Arc<LatestReadingStore>,
    ) -> (Self, ScanSender, GpsSender) {
        Self::spawn_with_capacity(registry, estimator, store, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Start both ingest tasks. Must be called inside a tokio runtime.
    pub fn spawn_with_capacity(
        registry: Arc<BeaconRegistry>,
        estimator: Arc<WeightedNearestEstimator>,
        store: Arc<LatestReadingStore>,
        capacity: usize,
    ) -> (Self, ScanSender, GpsSender) {
        let capacity = capacity.max(1);
        let (scan_tx, scan_rx) = mpsc::channel(capacity);
        let (gps_tx, gps_rx) = mpsc::channel(capacity);
        let cancellation = CancellationToken::new();
        let counters = Arc::new(FeedCounters::default());

        let scan_task = tokio::spawn(run_scan_ingest(
            scan_rx,
            registry,
            estimator,
            Arc::clone(&store),
            Arc::clone(&counters),
            cancellation.clone(),
        ));
        let gps_task = tokio::spawn(run_gps_ingest(gps_rx, store, Arc::clone(&counters), cancellation.clone()));

        info!(capacity, "Reading feeds started");

        (
            Self {
                cancellation,
                scan_task: Some(scan_task),
                gps_task: Some(gps_task),
                counters,
            },
            ScanSender { tx: scan_tx },
            GpsSender { tx: gps_tx },
        )
    }

    /// Stop both ingest tasks and wait for them to exit.
    ///
    /// An estimate already running finishes and lands in the store before
    /// the scan task exits. Calling this again is a no-op.
    pub async fn stop(&mut self) {
        if self.scan_task.is_none() && self.gps_task.is_none() {
            return;
        }

        self.cancellation.cancel();
        self.join_tasks().await;
    }

    /// Process everything already queued, then stop.
    ///
    /// The ingest tasks exit once every `ScanSender` and `GpsSender` has been
    /// dropped and the channels are empty; until then this keeps waiting.
    pub async fn drain(&mut self) {
        self.join_tasks().await;
    }

    async fn join_tasks(&mut self) {
        if self.scan_task.is_none() && self.gps_task.is_none() {
            return;
        }

        for (name, handle) in [("scan", self.scan_task.take()), ("gps", self.gps_task.take())] {
            if let Some(handle) = handle {
                if let Err(e) = handle.await {
                    warn!(feed = name, error = %e, "Feed task ended abnormally");
                }
            }
        }

        let stats = self.stats();
        info!(
            scans = stats.scans_received,
            beacon_fixes = stats.beacon_fixes,
            gps_fixes = stats.gps_received,
            "Reading feeds stopped"
        );
    }

    pub fn is_running(&self) -> bool {
        self.scan_task.as_ref().is_some_and(|h| !h.is_finished())
            || self.gps_task.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stats(&self) -> FeedStats {
        FeedStats {
            scans_received: self.counters.scans_received.load(Ordering::Relaxed),
            beacon_fixes: self.counters.beacon_fixes.load(Ordering::Relaxed),
            no_fix: self.counters.no_fix.load(Ordering::Relaxed),
            gps_received: self.counters.gps_received.load(Ordering::Relaxed),
            gps_rejected: self.counters.gps_rejected.load(Ordering::Relaxed),
        }
    }
}

impl Drop for ReadingFeeds {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}

async fn run_scan_ingest(
    mut rx: mpsc::Receiver<ScanCycle>,
    registry: Arc<BeaconRegistry>,
    estimator: Arc<WeightedNearestEstimator>,
    store: Arc<LatestReadingStore>,
    counters: Arc<FeedCounters>,
    cancellation: CancellationToken,
) {
    loop {
        let cycle = tokio::select! {
            biased;
            _ = cancellation.cancelled() => break,
            cycle = rx.recv() => match cycle {
                Some(cycle) => cycle,
                None => break,
            },
        };

        counters.scans_received.fetch_add(1, Ordering::Relaxed);
        let timestamp_ms = cycle.timestamp_ms;
        let detected = cycle.readings.len();

        let registry = Arc::clone(&registry);
        let estimator = Arc::clone(&estimator);
        let estimate = match tokio::task::spawn_blocking(move || estimator.estimate(&cycle.readings, &registry)).await {
            Ok(estimate) => estimate,
            Err(e) => {
                warn!(error = %e, "Position estimate task failed, scan cycle discarded");
                continue;
            }
        };

        match estimate {
            Estimate::Fix(fix) => {
                counters.beacon_fixes.fetch_add(1, Ordering::Relaxed);
                store.update_beacon(fix.position, timestamp_ms);
                debug!(
                    lat = fix.position.latitude,
                    lon = fix.position.longitude,
                    detected,
                    beacons_used = fix.beacons_used,
                    "Beacon position updated"
                );
            }
            Estimate::NoFix(reason) => {
                counters.no_fix.fetch_add(1, Ordering::Relaxed);
                debug!(detected, %reason, "No beacon position for scan cycle");
            }
        }
    }

    debug!("Scan ingest stopped");
}

async fn run_gps_ingest(
    mut rx: mpsc::Receiver<GpsFix>,
    store: Arc<LatestReadingStore>,
    counters: Arc<FeedCounters>,
    cancellation: CancellationToken,
) {
    loop {
        let fix = tokio::select! {
            biased;
            _ = cancellation.cancelled() => break,
            fix = rx.recv() => match fix {
                Some(fix) => fix,
                None => break,
            },
        };

        if !fix.position.is_valid() {
            counters.gps_rejected.fetch_add(1, Ordering::Relaxed);
            warn!(lat = fix.position.latitude, lon = fix.position.longitude, "Ignoring invalid GPS fix");
            continue;
        }

        counters.gps_received.fetch_add(1, Ordering::Relaxed);
        store.update_gps(fix.position, fix.received_at_ms);
    }

    debug!("GPS ingest stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DetectedBeaconReading, ReferenceBeacon, UserPosition};
    use std::time::Duration;

    fn registry() -> Arc<BeaconRegistry> {
        let beacon = |uid: &str, lat: f64, lon: f64| ReferenceBeacon {
            id: 1,
            uid: Some(uid.to_string()),
            latitude: lat,
            longitude: lon,
            floor_id: 0,
            number_on_floor: 1,
            building_short_name: None,
            room_placed: true,
            near_floor_change: false,
            tx_power_to_set: 0,
        };
        Arc::new(BeaconRegistry::from_beacons(vec![beacon("a", 52.0, 21.0), beacon("b", 52.0, 21.002)]).0)
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_scan_cycle_updates_beacon_slot() {
        let store = Arc::new(LatestReadingStore::new());
        let (mut feeds, scans, _gps) =
            ReadingFeeds::spawn(registry(), Arc::new(WeightedNearestEstimator::default()), Arc::clone(&store));

        let cycle = ScanCycle::new(vec![DetectedBeaconReading::new("a", 1.0), DetectedBeaconReading::new("b", 1.0)])
            .with_timestamp(42);
        scans.send(cycle).await.unwrap();

        wait_until(|| store.last_beacon().is_some()).await;
        let beacon = store.last_beacon().unwrap();
        assert_eq!(beacon.updated_at_ms, 42);
        assert!((beacon.position.longitude - 21.001).abs() < 1e-9);

        feeds.stop().await;
        assert_eq!(feeds.stats().beacon_fixes, 1);
    }

    #[tokio::test]
    async fn test_no_fix_keeps_previous_position() {
        let store = Arc::new(LatestReadingStore::new());
        store.update_beacon(UserPosition::new(1.0, 2.0), 1);
        let (mut feeds, scans, _gps) =
            ReadingFeeds::spawn(registry(), Arc::new(WeightedNearestEstimator::default()), Arc::clone(&store));

        scans.send(ScanCycle::new(vec![DetectedBeaconReading::new("zz", 1.0)])).await.unwrap();
        wait_until(|| feeds.stats().no_fix == 1).await;

        assert_eq!(store.last_beacon().unwrap().position, UserPosition::new(1.0, 2.0));
        feeds.stop().await;
    }

    #[tokio::test]
    async fn test_gps_fixes_update_gps_slot() {
        let store = Arc::new(LatestReadingStore::new());
        let (mut feeds, _scans, gps) =
            ReadingFeeds::spawn(registry(), Arc::new(WeightedNearestEstimator::default()), Arc::clone(&store));

        gps.send(GpsFix::new(200.0, 0.0)).await.unwrap();
        gps.send(GpsFix::new(52.1, 21.1).with_timestamp(7)).await.unwrap();

        wait_until(|| store.last_gps().is_some()).await;
        assert_eq!(store.last_gps().unwrap().updated_at_ms, 7);

        feeds.stop().await;
        let stats = feeds.stats();
        assert_eq!(stats.gps_received, 1);
        assert_eq!(stats.gps_rejected, 1);
    }

    #[tokio::test]
    async fn test_stop_closes_producers() {
        let store = Arc::new(LatestReadingStore::new());
        let (mut feeds, scans, gps) =
            ReadingFeeds::spawn(registry(), Arc::new(WeightedNearestEstimator::default()), store);

        feeds.stop().await;
        assert!(!feeds.is_running());
        assert_eq!(scans.send(ScanCycle::default()).await, Err(FeedError::Closed));
        assert_eq!(gps.try_send(GpsFix::new(0.0, 0.0)), Err(FeedError::Closed));

        // second stop is a no-op
        feeds.stop().await;
    }

    #[tokio::test]
    async fn test_drain_processes_queued_cycles() {
        let store = Arc::new(LatestReadingStore::new());
        let (mut feeds, scans, gps) =
            ReadingFeeds::spawn(registry(), Arc::new(WeightedNearestEstimator::default()), Arc::clone(&store));

        for i in 0..5 {
            scans
                .send(ScanCycle::new(vec![DetectedBeaconReading::new("a", 1.0)]).with_timestamp(i))
                .await
                .unwrap();
        }
        gps.send(GpsFix::new(52.0, 21.0).with_timestamp(9)).await.unwrap();
        drop(scans);
        drop(gps);

        feeds.drain().await;
        assert!(!feeds.is_running());
        assert_eq!(feeds.stats().beacon_fixes, 5);
        assert_eq!(store.last_beacon().unwrap().updated_at_ms, 4);
        assert_eq!(store.last_gps().unwrap().updated_at_ms, 9);
    }
}
