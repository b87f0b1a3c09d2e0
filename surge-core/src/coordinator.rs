use std::sync::atomic::AtomicU64;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use surge_metrics::Registry;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::{ExecutorConfig, ExecutorKind};
use crate::context::CheckTally;
use crate::error::{Error, Result};
use crate::executor::{self, ExecutorReport, ScenarioEnv};
use crate::metrics::BuiltinMetrics;
use crate::result::{CheckSummary, RunResult, ScenarioReport, ScenarioStatus};
use crate::scenario::Scenario;
use crate::schedule::{RampSchedule, StageSnapshot};
use crate::signal::StopSignal;
use crate::thresholds::{self, ThresholdExpr};
use crate::transport::HttpTransport;

const TICK: Duration = Duration::from_millis(50);
const PROGRESS_EVERY: u32 = 20;
const DEFAULT_ABORT_GRACE: Duration = Duration::from_secs(5);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, strum::EnumString, strum::Display,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    Pending,
    Running,
    /// Every scenario has started; waiting for the last ones to finish.
    Completing,
    Complete,
    Aborted,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Aborted)
    }
}

#[derive(Debug)]
struct ControlInner {
    abort: StopSignal,
    reason: OnceLock<String>,
    state: watch::Sender<RunState>,
}

/// Handle for observing and aborting a run from outside.
#[derive(Debug, Clone)]
pub struct RunControl {
    inner: Arc<ControlInner>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        let (state, _) = watch::channel(RunState::Pending);
        Self {
            inner: Arc::new(ControlInner {
                abort: StopSignal::new(),
                reason: OnceLock::new(),
                state,
            }),
        }
    }

    pub fn abort(&self) {
        self.abort_with("abort requested");
    }

    /// Requests an abort. Only the first reason is kept.
    pub fn abort_with(&self, reason: impl Into<String>) {
        let _ = self.inner.reason.set(reason.into());
        if self.inner.abort.fire() {
            self.set_state(RunState::Aborted);
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.abort.is_fired()
    }

    pub fn abort_reason(&self) -> Option<&str> {
        self.inner.reason.get().map(String::as_str)
    }

    pub fn state(&self) -> RunState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.inner.state.subscribe()
    }

    /// Terminal states are final.
    pub(crate) fn set_state(&self, next: RunState) {
        self.inner.state.send_if_modified(|state| {
            if state.is_terminal() || *state == next {
                return false;
            }
            *state = next;
            true
        });
    }

    pub(crate) async fn aborted(&self) {
        self.inner.abort.wait().await;
    }
}

/// Aborts the run once more than `max_rate` of the invocations so far have failed.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorCeiling {
    pub max_rate: f64,
    /// Don't judge before this many invocations have finished.
    #[serde(default)]
    pub min_iterations: u64,
}

impl ErrorCeiling {
    fn exceeded(&self, iterations: u64, errors: u64) -> Option<f64> {
        if iterations == 0 || iterations < self.min_iterations {
            return None;
        }
        let rate = errors as f64 / iterations as f64;
        (rate > self.max_rate).then_some(rate)
    }
}

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Number of progress rounds so far, starting at 1.
    pub tick: u64,
    pub elapsed: Duration,
    pub scenario: String,
    pub executor: ExecutorKind,
    pub state: RunState,
    pub status: ScenarioStatus,
    pub iterations: u64,
    pub errors: u64,
    pub dropped: u64,
    pub active_vus: u64,
    pub vus: u64,
    /// Time since the scenario started.
    pub scenario_elapsed: Duration,
    pub total_duration: Duration,
    /// Current ramp stage of a ramping executor.
    pub stage: Option<StageSnapshot>,
}

pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;

#[derive(Clone)]
pub struct RunOptions {
    /// How long stopped scenarios may take to finish after an abort.
    pub abort_grace: Duration,
    pub error_ceiling: Option<ErrorCeiling>,
    pub progress: Option<ProgressFn>,
    /// Defaults to a `surge_http::HttpClient` with default options.
    pub transport: Option<Arc<dyn HttpTransport>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            abort_grace: DEFAULT_ABORT_GRACE,
            error_ceiling: None,
            progress: None,
            transport: None,
        }
    }
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("abort_grace", &self.abort_grace)
            .field("error_ceiling", &self.error_ceiling)
            .field("progress", &self.progress.is_some())
            .field("transport", &self.transport.is_some())
            .finish()
    }
}

/// A set of scenarios and thresholds, run once.
pub struct TestRun {
    registry: Arc<Registry>,
    builtins: BuiltinMetrics,
    scenarios: Vec<Scenario>,
    thresholds: Vec<ThresholdExpr>,
    options: RunOptions,
    control: RunControl,
}

impl TestRun {
    /// Registers the built-in metrics in `registry`.
    pub fn new(registry: Arc<Registry>) -> Result<Self> {
        let builtins = BuiltinMetrics::register(&registry)?;
        Ok(Self {
            registry,
            builtins,
            scenarios: Vec::new(),
            thresholds: Vec::new(),
            options: RunOptions::default(),
            control: RunControl::new(),
        })
    }

    pub fn scenario(&mut self, scenario: Scenario) -> Result<&mut Self> {
        scenario.validate()?;
        if self.scenarios.iter().any(|s| s.name() == scenario.name()) {
            return Err(Error::DuplicateScenario(scenario.name().to_string()));
        }
        self.scenarios.push(scenario);
        Ok(self)
    }

    /// The threshold's metric must already be registered.
    pub fn threshold(&mut self, expr: ThresholdExpr) -> Result<&mut Self> {
        thresholds::validate_one(&expr, &self.registry)?;
        self.thresholds.push(expr);
        Ok(self)
    }

    pub fn options(&mut self, options: RunOptions) -> &mut Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn control(&self) -> RunControl {
        self.control.clone()
    }

    pub async fn run(self) -> Result<RunResult> {
        if self.scenarios.is_empty() {
            return Err(Error::NoScenarios);
        }

        let Self {
            registry,
            builtins,
            scenarios,
            thresholds,
            options,
            control,
        } = self;

        let transport = options
            .transport
            .clone()
            .unwrap_or_else(|| Arc::new(surge_http::HttpClient::default()));
        let checks = Arc::new(CheckTally::default());
        let vu_ids = Arc::new(AtomicU64::new(0));

        let mut slots: Vec<Slot> = scenarios
            .into_iter()
            .map(|scenario| {
                let env = Arc::new(ScenarioEnv::new(
                    Arc::from(scenario.name()),
                    scenario.workload(),
                    registry.clone(),
                    builtins.clone(),
                    transport.clone(),
                    checks.clone(),
                    control.clone(),
                    vu_ids.clone(),
                ));
                Slot::new(scenario, env)
            })
            .collect();

        tracing::info!(
            scenarios = slots.len(),
            thresholds = thresholds.len(),
            "run started"
        );

        let started = Instant::now();
        control.set_state(RunState::Running);

        let mut interval = tokio::time::interval(TICK);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks: u32 = 0;
        let mut progress_rounds: u64 = 0;
        let mut aborted = false;

        loop {
            tokio::select! {
                biased;
                _ = control.aborted() => {
                    aborted = true;
                    break;
                }
                _ = interval.tick() => {}
            }

            let elapsed = started.elapsed();
            for slot in slots.iter_mut() {
                if slot.status == ScenarioStatus::Pending && elapsed >= slot.scenario.offset() {
                    slot.start(elapsed);
                }
            }
            for slot in slots.iter_mut() {
                if slot.handle.as_ref().is_some_and(JoinHandle::is_finished) {
                    // Dropping `slots` on error cancels the executors still running.
                    slot.finish(started.elapsed()).await?;
                }
            }

            if slots.iter().all(|s| s.status.is_finished()) {
                control.set_state(RunState::Completing);
                break;
            }

            if let Some(ceiling) = options.error_ceiling
                && let Some(rate) =
                    ceiling.exceeded(builtins.iterations.get(), builtins.iteration_errors.get())
            {
                tracing::warn!(
                    error_rate = rate,
                    max_rate = ceiling.max_rate,
                    "iteration error rate above ceiling"
                );
                control.abort_with(format!(
                    "iteration error rate {:.2}% exceeded the {:.2}% ceiling",
                    rate * 100.0,
                    ceiling.max_rate * 100.0
                ));
            }

            ticks += 1;
            if ticks % PROGRESS_EVERY == 0
                && let Some(progress) = options.progress.as_ref()
            {
                progress_rounds += 1;
                let state = control.state();
                for slot in &slots {
                    progress(slot.progress(progress_rounds, started.elapsed(), state));
                }
            }
        }

        if aborted {
            let reason = control.abort_reason().unwrap_or("abort requested").to_string();
            tracing::info!(reason = %reason, "aborting run");
            shutdown(&mut slots, started, options.abort_grace).await?;
        }

        if !aborted {
            // Lets state subscribers observe `Completing` before the run turns `Complete`.
            tokio::task::yield_now().await;
        }

        let elapsed = started.elapsed();
        let metrics = registry.snapshot();
        let outcomes = thresholds::evaluate(&thresholds, &metrics);
        let passed = outcomes.iter().all(|o| o.passed);
        if !aborted {
            control.set_state(RunState::Complete);
        }

        tracing::info!(
            elapsed = ?elapsed,
            aborted,
            passed,
            iterations = builtins.iterations.get(),
            "run finished"
        );

        Ok(RunResult {
            elapsed,
            aborted,
            abort_reason: aborted
                .then(|| control.abort_reason().map(str::to_string))
                .flatten(),
            scenarios: slots.iter().map(Slot::to_report).collect(),
            metrics,
            checks: checks
                .snapshot()
                .into_iter()
                .map(|(name, passes, fails)| CheckSummary {
                    name,
                    passes,
                    fails,
                })
                .collect(),
            thresholds: outcomes,
            passed,
        })
    }
}

/// Builds and runs a test in one call with default options.
pub async fn run_test(
    registry: Arc<Registry>,
    scenarios: Vec<Scenario>,
    thresholds: Vec<ThresholdExpr>,
) -> Result<RunResult> {
    let mut run = TestRun::new(registry)?;
    for scenario in scenarios {
        run.scenario(scenario)?;
    }
    for expr in thresholds {
        run.threshold(expr)?;
    }
    run.run().await
}

/// Stops every running scenario and waits up to `grace` for them; stragglers are cancelled.
async fn shutdown(slots: &mut [Slot], started: Instant, grace: Duration) -> Result<()> {
    for slot in slots.iter_mut() {
        match slot.status {
            ScenarioStatus::Pending => {
                tracing::debug!(scenario = %slot.scenario.name(), "scenario skipped");
                slot.status = ScenarioStatus::Skipped;
            }
            ScenarioStatus::Running => {
                slot.env.stop.fire();
            }
            _ => {}
        }
    }

    let deadline = Instant::now() + grace;
    let mut failed = None;
    for slot in slots.iter_mut() {
        let Some(handle) = slot.handle.as_mut() else {
            continue;
        };
        match tokio::time::timeout_at(deadline, &mut *handle).await {
            Ok(res) => {
                slot.handle = None;
                match res {
                    Ok(report) => slot.record(report, started.elapsed()),
                    Err(err) => {
                        tracing::error!(
                            scenario = %slot.scenario.name(),
                            error = %err,
                            "executor failed"
                        );
                        failed.get_or_insert(err);
                    }
                }
            }
            Err(_) => {
                handle.abort();
                slot.handle = None;
                tracing::warn!(
                    scenario = %slot.scenario.name(),
                    grace = ?grace,
                    "scenario did not stop within the abort grace period; terminating"
                );
                slot.report = slot.env.stats.report(true);
                slot.status = ScenarioStatus::ForceTerminated;
                slot.finished_at = Some(started.elapsed());
            }
        }
    }
    match failed {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

struct Slot {
    scenario: Scenario,
    env: Arc<ScenarioEnv>,
    ramp: Option<RampSchedule>,
    status: ScenarioStatus,
    handle: Option<JoinHandle<ExecutorReport>>,
    started_at: Option<Duration>,
    finished_at: Option<Duration>,
    report: ExecutorReport,
}

impl Slot {
    fn new(scenario: Scenario, env: Arc<ScenarioEnv>) -> Self {
        let ramp = match scenario.executor() {
            ExecutorConfig::RampingVus(c) => Some(RampSchedule::new(c.start_vus, c.stages.clone())),
            ExecutorConfig::RampingArrivalRate(c) => {
                Some(RampSchedule::new(c.start_rate, c.stages.clone()))
            }
            _ => None,
        };
        Self {
            scenario,
            env,
            ramp,
            status: ScenarioStatus::Pending,
            handle: None,
            started_at: None,
            finished_at: None,
            report: ExecutorReport::default(),
        }
    }

    fn start(&mut self, at: Duration) {
        tracing::info!(
            scenario = %self.scenario.name(),
            executor = %self.scenario.executor().kind(),
            "scenario started"
        );
        let config = self.scenario.executor().clone();
        self.handle = Some(tokio::spawn(executor::run(config, self.env.clone())));
        self.status = ScenarioStatus::Running;
        self.started_at = Some(at);
    }

    async fn finish(&mut self, at: Duration) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            let report = handle.await?;
            self.record(report, at);
        }
        Ok(())
    }

    fn record(&mut self, report: ExecutorReport, at: Duration) {
        self.report = report;
        self.status = if report.stopped {
            ScenarioStatus::Stopped
        } else {
            ScenarioStatus::Complete
        };
        self.finished_at = Some(at);
        tracing::info!(
            scenario = %self.scenario.name(),
            status = %self.status,
            iterations = report.iterations,
            errors = report.errors,
            dropped = report.dropped,
            "scenario finished"
        );
    }

    fn progress(&self, tick: u64, elapsed: Duration, state: RunState) -> ProgressUpdate {
        let stats = &self.env.stats;
        let scenario_elapsed = self
            .started_at
            .map(|s| elapsed.saturating_sub(s))
            .unwrap_or_default();
        let stage = match self.status {
            ScenarioStatus::Running => self
                .ramp
                .as_ref()
                .and_then(|r| r.stage_snapshot_at(scenario_elapsed)),
            _ => None,
        };
        ProgressUpdate {
            tick,
            elapsed,
            scenario: self.scenario.name().to_string(),
            executor: self.scenario.executor().kind(),
            state,
            status: self.status,
            iterations: stats.iterations(),
            errors: stats.errors(),
            dropped: stats.dropped(),
            active_vus: stats.active_vus(),
            vus: stats.vus(),
            scenario_elapsed,
            total_duration: self.scenario.executor().total_duration(),
            stage,
        }
    }

    fn to_report(&self) -> ScenarioReport {
        ScenarioReport {
            name: self.scenario.name().to_string(),
            executor: self.scenario.executor().kind(),
            status: self.status,
            start_time: self.scenario.offset(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            iterations: self.report.iterations,
            errors: self.report.errors,
            dropped: self.report.dropped,
            peak_vus: self.report.peak_vus,
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.env.stop.fire();
            handle.abort();
        }
    }
}
