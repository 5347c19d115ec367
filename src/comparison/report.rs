//! Human and machine readable renderings of a comparison outcome

use chrono::{DateTime, Utc};
use std::fmt::Write;

use super::analysis::DivergenceResult;
use super::sample::ComparisonSample;
use super::session::ComparisonOutcome;
use crate::core::UserPosition;

/// Wall-clock time of day in UTC, `HH:MM:SS`
pub fn format_time_of_day(timestamp_ms: u64) -> String {
    i64::try_from(timestamp_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string())
}

/// Plain-text report listing the largest divergences
#[derive(Debug, Clone)]
pub struct TextReportFormatter {
    /// Decimal places for coordinates
    pub coordinate_decimals: usize,
    /// Also list every recorded sample
    pub include_samples: bool,
}

impl Default for TextReportFormatter {
    fn default() -> Self {
        Self {
            coordinate_decimals: 5,
            include_samples: false,
        }
    }
}

impl TextReportFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_samples(mut self) -> Self {
        self.include_samples = true;
        self
    }

    fn position(&self, position: &UserPosition) -> String {
        format!(
            "(lat={:.prec$}, lon={:.prec$})",
            position.latitude,
            position.longitude,
            prec = self.coordinate_decimals
        )
    }

    fn optional_position(&self, position: &Option<UserPosition>) -> String {
        position.as_ref().map_or_else(|| "-".to_string(), |p| self.position(p))
    }

    pub fn format(&self, outcome: &ComparisonOutcome) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Comparison session {} ({}, {} samples, {} to {} UTC)",
            outcome.session_id,
            outcome.mode,
            outcome.samples.len(),
            format_time_of_day(outcome.started_at_ms),
            format_time_of_day(outcome.finished_at_ms),
        );
        if outcome.missed_estimates > 0 {
            let _ = writeln!(
                out,
                "Missed estimates: {} (sampler fell behind, not recorded)",
                outcome.missed_estimates
            );
        }

        match &outcome.result {
            DivergenceResult::NoComparableData { total_samples } => {
                let _ = writeln!(
                    out,
                    "No comparable data: none of the {total_samples} samples had both a beacon and a GPS position"
                );
            }
            DivergenceResult::Ranked(report) => {
                let stats = &report.statistics;
                let _ = writeln!(
                    out,
                    "Comparable samples: {} of {}",
                    report.valid_samples, report.total_samples
                );
                let _ = writeln!(
                    out,
                    "Divergence: mean {:.1} m, median {:.1} m, RMSE {:.1} m, min {:.1} m, max {:.1} m",
                    stats.mean_m, stats.median_m, stats.rmse_m, stats.min_m, stats.max_m
                );
                let _ = writeln!(out, "Top {} divergences:", report.top.len());
                for entry in &report.top {
                    let _ = writeln!(
                        out,
                        "{:>2}. {}  {:.1} m  beacon {}  gps {}",
                        entry.rank,
                        format_time_of_day(entry.timestamp_ms),
                        entry.difference_m,
                        self.position(&entry.beacon_position),
                        self.position(&entry.gps_position),
                    );
                }
            }
        }

        if self.include_samples {
            let _ = writeln!(out, "Samples:");
            for sample in &outcome.samples {
                let difference = sample
                    .difference_m
                    .map_or_else(|| "-".to_string(), |d| format!("{d:.1} m"));
                let _ = writeln!(
                    out,
                    "{:>4}  {}  beacon {}  gps {}  {}",
                    sample.sequence,
                    format_time_of_day(sample.timestamp_ms),
                    self.optional_position(&sample.beacon_position),
                    self.optional_position(&sample.gps_position),
                    difference,
                );
            }
        }

        out
    }
}

/// Full outcome as JSON
#[derive(Debug, Clone, Default)]
pub struct JsonReportFormatter {
    pub pretty: bool,
}

impl JsonReportFormatter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    pub fn format(&self, outcome: &ComparisonOutcome) -> Result<String, serde_json::Error> {
        if self.pretty {
            serde_json::to_string_pretty(outcome)
        } else {
            serde_json::to_string(outcome)
        }
    }
}

/// Raw sample log as CSV, one row per sample; missing values are empty cells
#[derive(Debug, Clone, Default)]
pub struct CsvReportFormatter;

impl CsvReportFormatter {
    pub const HEADER: &'static str =
        "sequence,timestamp_ms,time_utc,beacon_latitude,beacon_longitude,gps_latitude,gps_longitude,difference_m";

    pub fn format(&self, outcome: &ComparisonOutcome) -> String {
        let mut out = String::with_capacity(64 * (outcome.samples.len() + 1));
        out.push_str(Self::HEADER);
        out.push('\n');
        for sample in &outcome.samples {
            out.push_str(&Self::row(sample));
            out.push('\n');
        }
        out
    }

    fn row(sample: &ComparisonSample) -> String {
        let coords = |p: &Option<UserPosition>| match p {
            Some(p) => format!("{:.7},{:.7}", p.latitude, p.longitude),
            None => ",".to_string(),
        };
        format!(
            "{},{},{},{},{},{}",
            sample.sequence,
            sample.timestamp_ms,
            format_time_of_day(sample.timestamp_ms),
            coords(&sample.beacon_position),
            coords(&sample.gps_position),
            sample.difference_m.map(|d| format!("{d:.3}")).unwrap_or_default(),
        )
    }
}
