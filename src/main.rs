//! Beacon positioning CLI
//!
//! Replays recorded scanner and GPS traces through the positioning pipeline
//! and reports how far the beacon estimates diverge from GPS.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use beacon_positioning::comparison::{
    ComparisonEngine, CsvReportFormatter, JsonReportFormatter, SamplingMode, TextReportFormatter,
};
use beacon_positioning::registry::BeaconRegistry;
use beacon_positioning::tracking::{self, LatestReadingStore, ReadingFeeds};
use beacon_positioning::utils::{init_logging, ConfigurationManager};
use beacon_positioning::WeightedNearestEstimator;

/// Time given to the sampler to record estimates produced at the end of a replay
const SETTLE_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ReportFormat {
    /// Ranked divergences and summary statistics
    Text,
    /// Full outcome including every sample
    Json,
    /// Raw sample log
    Csv,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    /// Sample on a fixed clock tick
    FixedTick,
    /// Sample on every beacon estimate
    PerEstimate,
}

impl From<ModeArg> for SamplingMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::FixedTick => SamplingMode::FixedTick,
            ModeArg::PerEstimate => SamplingMode::PerEstimate,
        }
    }
}

#[derive(Parser)]
#[command(name = "beacon-positioning")]
#[command(about = "Beacon positioning and GPS divergence analysis", long_about = None)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging regardless of RUST_LOG
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a trace while a comparison session runs, then print the report
    Compare {
        /// JSON-lines trace of scan and GPS events
        trace: PathBuf,

        /// Beacon catalog, overrides the configured path
        #[arg(long)]
        catalog: Option<PathBuf>,

        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Session length in seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Fixed-tick sampling period in milliseconds
        #[arg(long)]
        tick_ms: Option<u64>,

        /// Number of largest divergences to report
        #[arg(long)]
        top_n: Option<usize>,

        /// Playback speed factor, 0 replays without pauses
        #[arg(long, default_value = "1.0")]
        time_scale: f64,

        /// Keep the session running until its duration elapses
        #[arg(long)]
        wait: bool,

        #[arg(long, value_enum, default_value = "text")]
        format: ReportFormat,

        /// List every sample in the text report
        #[arg(long)]
        samples: bool,
    },
    /// Load a catalog and summarize it
    Catalog {
        /// Beacon catalog, overrides the configured path
        path: Option<PathBuf>,
    },
    /// Write the default configuration to a file
    InitConfig {
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ConfigurationManager::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => ConfigurationManager::new(),
    };

    init_logging(Some(&config.get_system_config().log_level), cli.debug)
        .context("failed to initialize logging")?;

    match cli.command {
        Command::Compare {
            trace,
            catalog,
            mode,
            duration,
            tick_ms,
            top_n,
            time_scale,
            wait,
            format,
            samples,
        } => {
            if let Some(catalog) = catalog {
                config.set_catalog_path(Some(catalog));
            }
            if let Some(mode) = mode {
                config.set_sampling_mode(mode.into());
            }
            if let Some(duration) = duration {
                config.set_session_duration(Some(duration))?;
            }
            if let Some(tick_ms) = tick_ms {
                config.set_tick_interval(tick_ms)?;
            }
            if let Some(top_n) = top_n {
                config.set_top_n(top_n)?;
            }
            if wait && config.get_system_config().comparison.duration_secs.is_none() {
                bail!("--wait needs a session duration");
            }

            let report = run_compare(&config, &trace, time_scale, wait, format, samples).await?;
            print!("{report}");
        }
        Command::Catalog { path } => {
            let path = path
                .or_else(|| config.get_system_config().catalog_path.clone())
                .context("no catalog path given or configured")?;
            summarize_catalog(&path)?;
        }
        Command::InitConfig { output } => {
            config
                .save_to_file(&output)
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!("Wrote configuration to {}", output.display());
        }
    }

    Ok(())
}

async fn run_compare(
    config: &ConfigurationManager,
    trace_path: &Path,
    time_scale: f64,
    wait: bool,
    format: ReportFormat,
    include_samples: bool,
) -> Result<String> {
    let system = config.get_system_config();
    for warning in ConfigurationManager::validate_system_config(system).warnings {
        warn!("{warning}");
    }

    let registry = match &system.catalog_path {
        Some(path) => {
            let (registry, report) = BeaconRegistry::load_from_path(path);
            if let Some(error) = &report.load_error {
                warn!(error = %error, "Continuing with an empty beacon registry");
            }
            registry
        }
        None => BeaconRegistry::new(),
    };

    let trace_file =
        File::open(trace_path).with_context(|| format!("failed to open trace {}", trace_path.display()))?;
    let records = tracking::parse_trace(BufReader::new(trace_file))?;
    info!(events = records.len(), "Trace loaded");

    let store = Arc::new(LatestReadingStore::new());
    let estimator = Arc::new(WeightedNearestEstimator::new(system.estimator.clone()));
    let (mut feeds, scans, gps) = ReadingFeeds::spawn(Arc::new(registry), estimator, Arc::clone(&store));

    let engine = ComparisonEngine::new(Arc::clone(&store));
    engine.start(system.comparison.session_config())?;

    let replayed = tracking::replay(&records, &scans, &gps, time_scale).await;
    drop(scans);
    drop(gps);
    feeds.drain().await;
    replayed.context("trace replay aborted")?;

    let outcome = if wait {
        engine.wait_for_outcome().await?
    } else {
        tokio::time::sleep(SETTLE_DELAY).await;
        engine.stop().await?
    };

    let report = match format {
        ReportFormat::Text => {
            let formatter = TextReportFormatter::new();
            let formatter = if include_samples { formatter.with_samples() } else { formatter };
            formatter.format(&outcome)
        }
        ReportFormat::Json => JsonReportFormatter::new(true).format(&outcome)? + "\n",
        ReportFormat::Csv => CsvReportFormatter.format(&outcome),
    };
    Ok(report)
}

fn summarize_catalog(path: &Path) -> Result<()> {
    let (registry, report) = BeaconRegistry::try_load_from_path(path)?;

    println!("Catalog: {}", path.display());
    println!("  Beacons indexed: {}", report.loaded);
    println!("  Duplicate UIDs: {}", report.duplicates);
    println!("  Skipped entries: {}", report.skipped.len());
    for skipped in &report.skipped {
        println!("    {skipped}");
    }

    let mut floors: Vec<i64> = registry.iter().map(|b| b.floor_id).collect();
    floors.sort_unstable();
    floors.dedup();
    for floor in floors {
        println!("  Floor {floor}: {} beacons", registry.by_floor(floor).len());
    }
    Ok(())
}
