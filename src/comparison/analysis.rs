//! Divergence analysis of a finished session
//!
//! Computes the geodesic distance for every complete sample, ranks the
//! largest divergences and summarizes the error distribution.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::sample::ComparisonSample;
use crate::algorithms::geodesy;
use crate::core::UserPosition;

/// One ranked divergence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivergenceEntry {
    /// 1-based rank, 1 is the largest divergence
    pub rank: usize,
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub beacon_position: UserPosition,
    pub gps_position: UserPosition,
    pub difference_m: f64,
}

/// Error distribution over all comparable samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivergenceStatistics {
    pub mean_m: f64,
    pub rmse_m: f64,
    pub median_m: f64,
    pub min_m: f64,
    pub max_m: f64,
    pub sample_count: usize,
}

/// Ranking of the largest divergences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivergenceReport {
    pub top: Vec<DivergenceEntry>,
    pub statistics: DivergenceStatistics,
    /// Samples with both positions
    pub valid_samples: usize,
    /// All recorded samples, including incomplete ones
    pub total_samples: usize,
}

/// Analysis verdict for a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum DivergenceResult {
    Ranked(DivergenceReport),
    /// No sample had both a beacon estimate and a GPS fix
    NoComparableData { total_samples: usize },
}

impl DivergenceResult {
    pub fn report(&self) -> Option<&DivergenceReport> {
        match self {
            DivergenceResult::Ranked(report) => Some(report),
            DivergenceResult::NoComparableData { .. } => None,
        }
    }

    pub fn has_comparable_data(&self) -> bool {
        matches!(self, DivergenceResult::Ranked(_))
    }
}

/// Fill in `difference_m` for every complete sample
pub fn compute_differences(samples: &mut [ComparisonSample]) {
    for sample in samples.iter_mut() {
        sample.difference_m = match (&sample.beacon_position, &sample.gps_position) {
            (Some(beacon), Some(gps)) => Some(geodesy::distance_m(beacon, gps)).filter(|d| d.is_finite()),
            _ => None,
        };
    }
}

/// Rank samples with a computed difference, largest first.
///
/// Equal differences are ordered oldest first, then by recording order.
pub fn rank_samples(samples: &[ComparisonSample], top_n: usize) -> Vec<DivergenceEntry> {
    let mut valid: Vec<(&ComparisonSample, f64, UserPosition, UserPosition)> = samples
        .iter()
        .filter_map(|s| match (s.difference_m, s.beacon_position, s.gps_position) {
            (Some(difference), Some(beacon), Some(gps)) => Some((s, difference, beacon, gps)),
            _ => None,
        })
        .collect();

    valid.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then(a.0.timestamp_ms.cmp(&b.0.timestamp_ms))
            .then(a.0.sequence.cmp(&b.0.sequence))
    });

    valid
        .into_iter()
        .take(top_n)
        .enumerate()
        .map(|(i, (sample, difference_m, beacon_position, gps_position))| DivergenceEntry {
            rank: i + 1,
            sequence: sample.sequence,
            timestamp_ms: sample.timestamp_ms,
            beacon_position,
            gps_position,
            difference_m,
        })
        .collect()
}

/// Summary statistics over the computed differences, `None` when there are none
pub fn calculate_statistics(samples: &[ComparisonSample]) -> Option<DivergenceStatistics> {
    let mut differences: Vec<f64> = samples.iter().filter_map(|s| s.difference_m).collect();
    if differences.is_empty() {
        return None;
    }

    differences.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let n = differences.len();

    let mean_m = differences.iter().sum::<f64>() / n as f64;
    let rmse_m = (differences.iter().map(|d| d * d).sum::<f64>() / n as f64).sqrt();
    let median_m = if n % 2 == 0 {
        (differences[n / 2 - 1] + differences[n / 2]) / 2.0
    } else {
        differences[n / 2]
    };

    Some(DivergenceStatistics {
        mean_m,
        rmse_m,
        median_m,
        min_m: differences[0],
        max_m: differences[n - 1],
        sample_count: n,
    })
}

/// Compute differences in place and produce the session verdict
pub fn analyze(samples: &mut [ComparisonSample], top_n: usize) -> DivergenceResult {
    compute_differences(samples);

    let Some(statistics) = calculate_statistics(samples) else {
        return DivergenceResult::NoComparableData {
            total_samples: samples.len(),
        };
    };

    DivergenceResult::Ranked(DivergenceReport {
        top: rank_samples(samples, top_n),
        valid_samples: statistics.sample_count,
        total_samples: samples.len(),
        statistics,
    })
}
