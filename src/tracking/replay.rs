//! Recorded trace replay
//!
//! A trace is a JSON-lines file of scanner and GPS events:
//!
//! ```text
//! {"t_ms": 0, "scan": [{"id": "C3:00:00:1A:2B:01", "distance": 1.8}]}
//! {"t_ms": 250, "gps": {"latitude": 52.22065, "longitude": 21.00991}}
//! ```
//!
//! Events are pushed through the normal producer handles, paced by their
//! `t_ms` offsets. Replayed readings are stamped with the wall-clock time of
//! delivery, the trace offsets only control pacing.

use serde::Deserialize;
use std::io::{self, BufRead};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use super::feeds::{FeedError, GpsSender, ScanSender};
use crate::core::{current_time_ms, DetectedBeaconReading, GpsFix, ScanCycle, UserPosition};

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("failed to read trace: {0}")]
    Io(#[from] io::Error),
    #[error("trace line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// One detected beacon in a recorded scan
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TraceReading {
    pub id: String,
    pub distance: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEvent {
    Scan(Vec<TraceReading>),
    Gps(UserPosition),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TraceRecord {
    /// Offset from the start of the recording (milliseconds)
    pub t_ms: u64,
    #[serde(flatten)]
    pub event: TraceEvent,
}

/// Counts of delivered events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub scans: usize,
    pub gps_fixes: usize,
}

/// Parse a trace, skipping blank lines and `#` comments. Records come back
/// ordered by `t_ms`; equal offsets keep file order.
pub fn parse_trace<R: BufRead>(reader: R) -> Result<Vec<TraceRecord>, TraceError> {
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let record: TraceRecord = serde_json::from_str(trimmed).map_err(|source| TraceError::Parse {
            line: index + 1,
            source,
        })?;
        records.push(record);
    }
    records.sort_by_key(|r| r.t_ms);
    Ok(records)
}

/// Deliver `records` through the feeds.
///
/// `time_scale` speeds up (> 1) or slows down (< 1) playback; zero or a
/// non-finite value replays without pauses.
pub async fn replay(
    records: &[TraceRecord],
    scans: &ScanSender,
    gps: &GpsSender,
    time_scale: f64,
) -> Result<ReplayStats, FeedError> {
    let paced = time_scale.is_finite() && time_scale > 0.0;
    let mut stats = ReplayStats::default();
    let mut previous_ms = records.first().map_or(0, |r| r.t_ms);

    for record in records {
        if paced && record.t_ms > previous_ms {
            let gap = Duration::from_millis(record.t_ms - previous_ms).div_f64(time_scale);
            tokio::time::sleep(gap).await;
        }
        previous_ms = record.t_ms;

        let now = current_time_ms();
        match &record.event {
            TraceEvent::Scan(readings) => {
                let readings = readings
                    .iter()
                    .map(|r| DetectedBeaconReading::new(r.id.clone(), r.distance).with_timestamp(now))
                    .collect();
                scans.send(ScanCycle::new(readings).with_timestamp(now)).await?;
                stats.scans += 1;
            }
            TraceEvent::Gps(position) => {
                gps.send(GpsFix::new(position.latitude, position.longitude).with_timestamp(now))
                    .await?;
                stats.gps_fixes += 1;
            }
        }
        debug!(t_ms = record.t_ms, "Replayed trace event");
    }

    info!(scans = stats.scans, gps_fixes = stats.gps_fixes, "Trace replay finished");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::WeightedNearestEstimator;
    use crate::registry::BeaconRegistry;
    use crate::tracking::{LatestReadingStore, ReadingFeeds};
    use std::sync::Arc;

    const TRACE: &str = r#"
# walk along the corridor
{"t_ms": 200, "gps": {"latitude": 52.2201, "longitude": 21.0100}}
{"t_ms": 0, "scan": [{"id": "b1", "distance": 1.0}, {"id": "b2", "distance": 1.0}]}

{"t_ms": 200, "scan": [{"id": "b1", "distance": 0.5}]}
"#;

    const CATALOG: &str = r#"{"items": [
        {"id": 1, "beaconUid": "b1", "latitude": 52.2200, "longitude": 21.0100, "floorId": 1,
         "numberOnFloor": 1, "roomPlaced": true, "nearFloorChange": false, "txPowerToSet": -4},
        {"id": 2, "beaconUid": "b2", "latitude": 52.2202, "longitude": 21.0100, "floorId": 1,
         "numberOnFloor": 2, "roomPlaced": true, "nearFloorChange": false, "txPowerToSet": -4}
    ]}"#;

    #[test]
    fn test_parse_trace_orders_by_offset() {
        let records = parse_trace(TRACE.as_bytes()).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].t_ms, 0);
        assert!(matches!(records[1].event, TraceEvent::Gps(_)));
        assert_eq!(
            records[2].event,
            TraceEvent::Scan(vec![TraceReading { id: "b1".to_string(), distance: 0.5 }])
        );
    }

    #[test]
    fn test_parse_error_reports_line() {
        let trace = "{\"t_ms\": 0, \"gps\": {\"latitude\": 1.0, \"longitude\": 2.0}}\n{\"t_ms\": 5}\n";
        match parse_trace(trace.as_bytes()) {
            Err(TraceError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_replay_through_feeds() {
        let (registry, report) = BeaconRegistry::load_from_str(CATALOG);
        assert_eq!(report.loaded, 2);

        let store = Arc::new(LatestReadingStore::new());
        let (mut feeds, scans, gps) = ReadingFeeds::spawn(
            Arc::new(registry),
            Arc::new(WeightedNearestEstimator::default()),
            Arc::clone(&store),
        );

        let records = parse_trace(TRACE.as_bytes()).unwrap();
        let stats = replay(&records, &scans, &gps, 0.0).await.unwrap();
        assert_eq!(stats, ReplayStats { scans: 2, gps_fixes: 1 });

        drop(scans);
        drop(gps);
        feeds.drain().await;

        // last scan saw only b1
        assert_eq!(store.last_beacon().unwrap().position, UserPosition::new(52.2200, 21.0100));
        assert_eq!(store.last_gps().unwrap().position, UserPosition::new(52.2201, 21.0100));
        assert_eq!(feeds.stats().beacon_fixes, 2);
    }
}
