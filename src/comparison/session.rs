//! Comparison session engine
//!
//! A session repeatedly snapshots the latest-reading store and appends one
//! sample per snapshot, either on a fixed clock tick or whenever a new beacon
//! estimate is stored. The session ends when its duration elapses or when
//! `stop` is called, whichever comes first. Exactly one of those paths
//! finalizes the session: it stops the sampler, runs the divergence analysis
//! and publishes the outcome to every caller waiting on it.
//!
//! Phases move `Idle -> Collecting -> Analyzing -> Idle`. Samples are only
//! appended while `Collecting` and under the same lock that changes the
//! phase, so nothing is added once analysis has begun. Finalization runs on
//! its own task, so a caller that abandons `stop` cannot leave the engine in
//! `Analyzing`.
//!
//! In per-estimate mode each sample pairs the estimate that triggered it with
//! the GPS slot as it is when the sample is recorded. Estimates lost to a
//! full update channel are counted in the outcome, never recorded.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::analysis::{self, DivergenceResult};
use super::error::SessionError;
use super::sample::ComparisonSample;
use crate::core::{
    current_time_ms, TimedPosition, DEFAULT_SESSION_DURATION_SECS, DEFAULT_TICK_INTERVAL_MS,
    DEFAULT_TOP_N,
};
use crate::tracking::{LatestReadingStore, StoreSnapshot};

/// Identifier of one comparison session, increasing per engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// When a session takes a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMode {
    /// One sample per tick interval; the first one a full interval after start
    #[default]
    FixedTick,
    /// One sample each time a beacon estimate is stored
    PerEstimate,
}

impl fmt::Display for SamplingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplingMode::FixedTick => write!(f, "fixed tick"),
            SamplingMode::PerEstimate => write!(f, "per estimate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    Idle,
    Collecting,
    Analyzing,
}

/// How a session came to an end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEnd {
    /// The configured duration elapsed
    Expired,
    /// `stop` was called first
    Stopped,
}

/// Parameters of one session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub mode: SamplingMode,
    /// `None` runs until stopped
    pub duration: Option<Duration>,
    /// Only used by `SamplingMode::FixedTick`
    pub tick_interval: Duration,
    /// Number of largest divergences to rank
    pub top_n: usize,
    /// Store values older than this are treated as missing when sampled
    pub max_reading_age: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: SamplingMode::FixedTick,
            duration: Some(Duration::from_secs(DEFAULT_SESSION_DURATION_SECS)),
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            top_n: DEFAULT_TOP_N,
            max_reading_age: None,
        }
    }
}

impl SessionConfig {
    pub fn fixed_tick(tick_interval: Duration, duration: Option<Duration>) -> Self {
        Self {
            mode: SamplingMode::FixedTick,
            tick_interval,
            duration,
            ..Self::default()
        }
    }

    pub fn per_estimate(duration: Option<Duration>) -> Self {
        Self {
            mode: SamplingMode::PerEstimate,
            duration,
            ..Self::default()
        }
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn with_max_reading_age(mut self, max_age: Duration) -> Self {
        self.max_reading_age = Some(max_age);
        self
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.top_n == 0 {
            return Err(SessionError::InvalidConfig("top_n must be at least 1".to_string()));
        }
        if self.mode == SamplingMode::FixedTick && self.tick_interval.is_zero() {
            return Err(SessionError::InvalidConfig("tick interval must be positive".to_string()));
        }
        Ok(())
    }

    /// Number of ticks that fit in the duration, `None` when unbounded
    fn max_ticks(&self) -> Option<u128> {
        self.duration
            .map(|d| d.as_nanos() / self.tick_interval.as_nanos().max(1))
    }
}

/// Everything a finished session produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonOutcome {
    pub session_id: SessionId,
    pub mode: SamplingMode,
    pub ended_by: SessionEnd,
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
    /// Full sample log in recording order, with differences filled in
    pub samples: Vec<ComparisonSample>,
    /// Per-estimate mode only: estimates dropped because the sampler fell behind
    pub missed_estimates: u64,
    pub result: DivergenceResult,
}

impl ComparisonOutcome {
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

struct SessionState {
    phase: SessionPhase,
    session_id: SessionId,
    config: SessionConfig,
    started_at_ms: u64,
    samples: Vec<ComparisonSample>,
    recorded: u64,
    missed_estimates: u64,
    cancellation: Option<CancellationToken>,
    sampler: Option<JoinHandle<()>>,
    last_outcome: Option<Arc<ComparisonOutcome>>,
}

/// Samples taken out of a session for analysis
struct PendingAnalysis {
    session_id: SessionId,
    mode: SamplingMode,
    top_n: usize,
    started_at_ms: u64,
    samples: Vec<ComparisonSample>,
    missed_estimates: u64,
}

enum StopAction {
    Done(Option<Arc<ComparisonOutcome>>),
    Wait(SessionId),
    Finalize {
        pending: PendingAnalysis,
        cancellation: Option<CancellationToken>,
        sampler: Option<JoinHandle<()>>,
    },
}

struct SessionShared {
    state: Mutex<SessionState>,
    outcomes: watch::Sender<Option<Arc<ComparisonOutcome>>>,
}

impl SessionShared {
    /// Append one sample if `session_id` is still collecting
    fn record(&self, session_id: SessionId, mut snapshot: StoreSnapshot, max_age: Option<Duration>) -> bool {
        if let Some(max_age) = max_age {
            snapshot = snapshot.without_stale(max_age.as_millis() as u64);
        }

        let mut state = self.state.lock();
        if state.phase != SessionPhase::Collecting || state.session_id != session_id {
            return false;
        }
        let sample = ComparisonSample::from_snapshot(state.recorded, &snapshot);
        state.samples.push(sample);
        state.recorded += 1;
        true
    }

    fn count_missed(&self, session_id: SessionId, missed: u64) {
        let mut state = self.state.lock();
        if state.phase == SessionPhase::Collecting && state.session_id == session_id {
            state.missed_estimates += missed;
        }
    }

    /// Move a collecting session to `Analyzing` and take its samples.
    /// Returns `None` if another path already did.
    fn begin_analysis(&self, session_id: SessionId) -> Option<(PendingAnalysis, Option<CancellationToken>, Option<JoinHandle<()>>)> {
        let mut state = self.state.lock();
        if state.phase != SessionPhase::Collecting || state.session_id != session_id {
            return None;
        }
        state.phase = SessionPhase::Analyzing;
        let pending = PendingAnalysis {
            session_id,
            mode: state.config.mode,
            top_n: state.config.top_n,
            started_at_ms: state.started_at_ms,
            samples: std::mem::take(&mut state.samples),
            missed_estimates: state.missed_estimates,
        };
        Some((pending, state.cancellation.take(), state.sampler.take()))
    }

    fn complete(&self, pending: PendingAnalysis, ended_by: SessionEnd) -> Arc<ComparisonOutcome> {
        let PendingAnalysis {
            session_id,
            mode,
            top_n,
            started_at_ms,
            mut samples,
            missed_estimates,
        } = pending;
        let result = analysis::analyze(&mut samples, top_n);

        match &result {
            DivergenceResult::Ranked(report) => info!(
                session = %session_id,
                samples = samples.len(),
                valid = report.valid_samples,
                max_m = report.statistics.max_m,
                mean_m = report.statistics.mean_m,
                "Comparison session analyzed"
            ),
            DivergenceResult::NoComparableData { total_samples } => warn!(
                session = %session_id,
                samples = total_samples,
                "Comparison session had no sample with both beacon and GPS positions"
            ),
        }

        let outcome = Arc::new(ComparisonOutcome {
            session_id,
            mode,
            ended_by,
            started_at_ms,
            finished_at_ms: current_time_ms(),
            samples,
            missed_estimates,
            result,
        });

        let mut state = self.state.lock();
        state.phase = SessionPhase::Idle;
        state.last_outcome = Some(Arc::clone(&outcome));
        self.outcomes.send_replace(Some(Arc::clone(&outcome)));
        outcome
    }

    /// Wait until the outcome of `session_id` (or a later one) is published
    async fn wait_for(&self, session_id: SessionId) -> Result<Arc<ComparisonOutcome>, SessionError> {
        let mut rx = self.outcomes.subscribe();
        let outcome = match rx
            .wait_for(|o| matches!(o, Some(o) if o.session_id >= session_id))
            .await
        {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        };
        outcome.ok_or(SessionError::Interrupted)
    }
}

/// Runs comparison sessions against a latest-reading store
pub struct ComparisonEngine {
    store: Arc<LatestReadingStore>,
    shared: Arc<SessionShared>,
}

impl ComparisonEngine {
    pub fn new(store: Arc<LatestReadingStore>) -> Self {
        let (outcomes, _) = watch::channel(None);
        let state = SessionState {
            phase: SessionPhase::Idle,
            session_id: SessionId(0),
            config: SessionConfig::default(),
            started_at_ms: 0,
            samples: Vec::new(),
            recorded: 0,
            missed_estimates: 0,
            cancellation: None,
            sampler: None,
            last_outcome: None,
        };
        Self {
            store,
            shared: Arc::new(SessionShared {
                state: Mutex::new(state),
                outcomes,
            }),
        }
    }

    pub fn store(&self) -> &Arc<LatestReadingStore> {
        &self.store
    }

    /// Begin a new session. Must be called inside a tokio runtime.
    pub fn start(&self, config: SessionConfig) -> Result<SessionId, SessionError> {
        config.validate()?;

        let mut state = self.shared.state.lock();
        if state.phase != SessionPhase::Idle {
            return Err(SessionError::AlreadyRunning(state.session_id));
        }

        let session_id = SessionId(state.session_id.0 + 1);
        let cancellation = CancellationToken::new();
        // subscribe before returning so no estimate stored after `start` is missed
        let updates = match config.mode {
            SamplingMode::PerEstimate => Some(self.store.subscribe_beacon_updates()),
            SamplingMode::FixedTick => None,
        };

        state.phase = SessionPhase::Collecting;
        state.session_id = session_id;
        state.config = config.clone();
        state.started_at_ms = current_time_ms();
        state.samples.clear();
        state.recorded = 0;
        state.missed_estimates = 0;
        state.cancellation = Some(cancellation.clone());

        // spawned under the lock so the sampler cannot finalize before its handle is stored
        state.sampler = Some(tokio::spawn(run_sampler(
            Arc::clone(&self.shared),
            Arc::clone(&self.store),
            config.clone(),
            session_id,
            cancellation,
            updates,
        )));

        info!(
            session = %session_id,
            mode = %config.mode,
            duration_ms = config.duration.map(|d| d.as_millis() as u64),
            "Comparison session started"
        );
        Ok(session_id)
    }

    /// End the current session early and return its outcome.
    ///
    /// Safe to call repeatedly and concurrently: every caller receives the
    /// same outcome, and analysis runs once. After a session has finished,
    /// returns the most recent outcome. Sampling stops as soon as this is
    /// first polled; dropping the returned future afterwards does not
    /// prevent the session from finishing.
    pub async fn stop(&self) -> Result<Arc<ComparisonOutcome>, SessionError> {
        match self.stop_action() {
            StopAction::Done(outcome) => outcome.ok_or(SessionError::NeverStarted),
            StopAction::Wait(session_id) => self.shared.wait_for(session_id).await,
            StopAction::Finalize { pending, cancellation, sampler } => {
                let session_id = pending.session_id;
                debug!(session = %session_id, "Stopping comparison session");
                if let Some(cancellation) = cancellation {
                    cancellation.cancel();
                }
                let finalizer = tokio::spawn(finalize_stopped(Arc::clone(&self.shared), pending, sampler));
                match finalizer.await {
                    Ok(outcome) => Ok(outcome),
                    Err(e) => {
                        warn!(session = %session_id, error = %e, "Comparison finalizer task failed");
                        Err(SessionError::Interrupted)
                    }
                }
            }
        }
    }

    fn stop_action(&self) -> StopAction {
        let session_id = {
            let state = self.shared.state.lock();
            match state.phase {
                SessionPhase::Idle => return StopAction::Done(state.last_outcome.clone()),
                SessionPhase::Analyzing => return StopAction::Wait(state.session_id),
                SessionPhase::Collecting => state.session_id,
            }
        };
        match self.shared.begin_analysis(session_id) {
            Some((pending, cancellation, sampler)) => StopAction::Finalize { pending, cancellation, sampler },
            // the sampler expired in between
            None => StopAction::Wait(session_id),
        }
    }

    /// Wait for the current session to finish on its own, or return the last outcome
    pub async fn wait_for_outcome(&self) -> Result<Arc<ComparisonOutcome>, SessionError> {
        let pending = {
            let state = self.shared.state.lock();
            match state.phase {
                SessionPhase::Idle => Err(state.last_outcome.clone()),
                _ => Ok(state.session_id),
            }
        };
        match pending {
            Ok(session_id) => self.shared.wait_for(session_id).await,
            Err(last) => last.ok_or(SessionError::NeverStarted),
        }
    }

    /// Samples recorded by the current or most recent session
    pub fn sample_count(&self) -> usize {
        self.shared.state.lock().recorded as usize
    }

    pub fn phase(&self) -> SessionPhase {
        self.shared.state.lock().phase
    }

    pub fn current_session(&self) -> Option<SessionId> {
        let state = self.shared.state.lock();
        (state.session_id.0 > 0).then_some(state.session_id)
    }

    pub fn last_outcome(&self) -> Option<Arc<ComparisonOutcome>> {
        self.shared.state.lock().last_outcome.clone()
    }
}

impl Drop for ComparisonEngine {
    fn drop(&mut self) {
        if let Some(cancellation) = self.shared.state.lock().cancellation.as_ref() {
            cancellation.cancel();
        }
    }
}

/// Join the cancelled sampler, then analyze and publish
async fn finalize_stopped(
    shared: Arc<SessionShared>,
    pending: PendingAnalysis,
    sampler: Option<JoinHandle<()>>,
) -> Arc<ComparisonOutcome> {
    // the sampler owns the store subscription; joining it deregisters
    if let Some(sampler) = sampler {
        if let Err(e) = sampler.await {
            warn!(error = %e, "Comparison sampler task failed");
        }
    }
    shared.complete(pending, SessionEnd::Stopped)
}

async fn expiry(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn run_sampler(
    shared: Arc<SessionShared>,
    store: Arc<LatestReadingStore>,
    config: SessionConfig,
    session_id: SessionId,
    cancellation: CancellationToken,
    updates: Option<broadcast::Receiver<TimedPosition>>,
) {
    match updates {
        None => {
            let max_ticks = config.max_ticks();
            let mut ticker = time::interval_at(Instant::now() + config.tick_interval, config.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut ticks: u128 = 0;

            while max_ticks.map_or(true, |max| ticks < max) {
                tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => return,
                    _ = ticker.tick() => {
                        shared.record(session_id, store.snapshot(), config.max_reading_age);
                        ticks += 1;
                    }
                }
            }
        }
        Some(mut updates) => {
            let expiry = expiry(config.duration.map(|d| Instant::now() + d));
            tokio::pin!(expiry);

            loop {
                tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => return,
                    _ = &mut expiry => break,
                    update = updates.recv() => match update {
                        Ok(estimate) => {
                            shared.record(session_id, store.snapshot_with_beacon(estimate), config.max_reading_age);
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(session = %session_id, skipped, "Comparison sampler fell behind beacon updates");
                            shared.count_missed(session_id, skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            // unsubscribe before analysis
            drop(updates);
        }
    }

    debug!(session = %session_id, "Comparison session duration elapsed");
    if let Some((pending, _, _)) = shared.begin_analysis(session_id) {
        shared.complete(pending, SessionEnd::Expired);
    }
}
