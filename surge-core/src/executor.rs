use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt as _;
use surge_metrics::Registry;
use tokio::time::Instant;

use crate::config::ExecutorConfig;
use crate::context::{CheckTally, IterationContext};
use crate::coordinator::RunControl;
use crate::metrics::{BuiltinMetrics, add_millis};
use crate::signal::StopSignal;
use crate::transport::HttpTransport;
use crate::workload::{Workload, WorkloadError};

mod arrival_rate;
mod ramping_vus;
mod shared_iterations;

/// What an executor did, reported when it finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorReport {
    pub iterations: u64,
    pub errors: u64,
    pub dropped: u64,
    pub peak_vus: u64,
    /// The executor ended because it was told to stop, not because its work ran out.
    pub stopped: bool,
}

/// Live per-scenario counters, readable while the executor runs.
#[derive(Debug, Default)]
pub(crate) struct ExecutorStats {
    iterations: AtomicU64,
    errors: AtomicU64,
    dropped: AtomicU64,
    active: AtomicU64,
    vus: AtomicU64,
    peak_vus: AtomicU64,
}

impl ExecutorStats {
    pub(crate) fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    pub(crate) fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Workers currently inside an invocation.
    pub(crate) fn active_vus(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    pub(crate) fn vus(&self) -> u64 {
        self.vus.load(Ordering::Relaxed)
    }

    fn add_vu(&self) {
        let now = self.vus.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_vus.fetch_max(now, Ordering::Relaxed);
    }

    fn remove_vu(&self) {
        self.vus.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn report(&self, stopped: bool) -> ExecutorReport {
        ExecutorReport {
            iterations: self.iterations(),
            errors: self.errors(),
            dropped: self.dropped(),
            peak_vus: self.peak_vus.load(Ordering::Relaxed),
            stopped,
        }
    }
}

/// Everything a scenario's workers share.
pub(crate) struct ScenarioEnv {
    pub(crate) name: Arc<str>,
    pub(crate) workload: Arc<dyn Workload>,
    pub(crate) registry: Arc<Registry>,
    pub(crate) builtins: BuiltinMetrics,
    pub(crate) transport: Arc<dyn HttpTransport>,
    pub(crate) checks: Arc<CheckTally>,
    /// Fired by the coordinator; executors stop issuing work once it is set.
    pub(crate) stop: Arc<StopSignal>,
    pub(crate) control: RunControl,
    pub(crate) stats: Arc<ExecutorStats>,
    /// Run-wide VU id allocator.
    pub(crate) vu_ids: Arc<AtomicU64>,
    /// Next invocation index for executors that don't claim indices themselves.
    next_iteration: AtomicU64,
}

impl ScenarioEnv {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: Arc<str>,
        workload: Arc<dyn Workload>,
        registry: Arc<Registry>,
        builtins: BuiltinMetrics,
        transport: Arc<dyn HttpTransport>,
        checks: Arc<CheckTally>,
        control: RunControl,
        vu_ids: Arc<AtomicU64>,
    ) -> Self {
        Self {
            name,
            workload,
            registry,
            builtins,
            transport,
            checks,
            stop: Arc::new(StopSignal::new()),
            control,
            stats: Arc::new(ExecutorStats::default()),
            vu_ids,
            next_iteration: AtomicU64::new(0),
        }
    }

    fn next_iteration(&self) -> u64 {
        self.next_iteration.fetch_add(1, Ordering::Relaxed)
    }
}

/// Identity of one worker; registered in the scenario's VU count for its lifetime.
pub(crate) struct Vu {
    env: Arc<ScenarioEnv>,
    vu_id: u64,
    scenario_vu: u64,
}

impl Vu {
    pub(crate) fn new(env: Arc<ScenarioEnv>, scenario_vu: u64) -> Self {
        let vu_id = env.vu_ids.fetch_add(1, Ordering::Relaxed) + 1;
        env.stats.add_vu();
        Self {
            env,
            vu_id,
            scenario_vu,
        }
    }

    /// Runs the workload once and records `iterations`, `iteration_duration` and, on
    /// failure, `iteration_errors`. A panic inside the workload counts as a failed iteration.
    pub(crate) async fn invoke(&self, iteration: u64) {
        let env = &self.env;
        let ctx = IterationContext::new(env.clone(), self.vu_id, self.scenario_vu, iteration);

        env.stats.active.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let res = AssertUnwindSafe(async { env.workload.call(ctx).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(WorkloadError::failed(panic_message(&*payload))));
        let elapsed = started.elapsed();
        env.stats.active.fetch_sub(1, Ordering::Relaxed);

        env.builtins.iterations.add(1);
        add_millis(&env.builtins.iteration_duration, elapsed);
        env.stats.iterations.fetch_add(1, Ordering::Relaxed);

        let Err(err) = res else {
            return;
        };

        env.builtins.iteration_errors.add(1);
        env.stats.errors.fetch_add(1, Ordering::Relaxed);
        match err {
            WorkloadError::Configuration(msg) => {
                tracing::error!(
                    scenario = %env.name,
                    vu = self.vu_id,
                    error = %msg,
                    "workload misconfigured"
                );
                env.control.abort_with(format!("scenario `{}`: {msg}", env.name));
            }
            WorkloadError::Failed(msg) => {
                tracing::debug!(
                    scenario = %env.name,
                    vu = self.vu_id,
                    iteration,
                    error = %msg,
                    "iteration failed"
                );
            }
        }
    }

    /// Same as `invoke` with the scenario's next invocation index.
    pub(crate) async fn invoke_next(&self) {
        let iteration = self.env.next_iteration();
        self.invoke(iteration).await;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let msg = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string payload");
    format!("workload panicked: {msg}")
}

impl Drop for Vu {
    fn drop(&mut self) {
        self.env.stats.remove_vu();
    }
}

/// Drives `config` until its work runs out or `env.stop` fires.
pub(crate) async fn run(config: ExecutorConfig, env: Arc<ScenarioEnv>) -> ExecutorReport {
    match config {
        ExecutorConfig::SharedIterations(c) => shared_iterations::run(c, env).await,
        ExecutorConfig::ConstantArrivalRate(c) => {
            let schedule = crate::schedule::RampSchedule::constant(c.rate, c.duration);
            let max_vus = c.max_vus.unwrap_or(c.pre_allocated_vus);
            arrival_rate::run(schedule, c.time_unit, c.pre_allocated_vus, max_vus, env).await
        }
        ExecutorConfig::RampingVus(c) => ramping_vus::run(c, env).await,
        ExecutorConfig::RampingArrivalRate(c) => {
            let schedule = crate::schedule::RampSchedule::new(c.start_rate, c.stages);
            let max_vus = c.max_vus.unwrap_or(c.pre_allocated_vus);
            arrival_rate::run(schedule, c.time_unit, c.pre_allocated_vus, max_vus, env).await
        }
    }
}
