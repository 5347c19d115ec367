//! Beacon versus GPS comparison sessions and divergence reporting

pub mod analysis;
pub mod error;
pub mod report;
pub mod sample;
pub mod session;

pub use analysis::{analyze, DivergenceEntry, DivergenceReport, DivergenceResult, DivergenceStatistics};
pub use error::SessionError;
pub use report::{CsvReportFormatter, JsonReportFormatter, TextReportFormatter};
pub use sample::ComparisonSample;
pub use session::{
    ComparisonEngine, ComparisonOutcome, SamplingMode, SessionConfig, SessionEnd, SessionId, SessionPhase,
};
