use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::task::JoinSet;
use tokio::time::Instant;

use super::{ExecutorReport, ScenarioEnv, Vu};
use crate::config::SharedIterationsConfig;
use crate::signal::StopSignal;

/// Claim-and-increment counter over `0..total`, closed at `deadline`.
#[derive(Debug)]
pub(crate) struct IterationPool {
    next: AtomicU64,
    total: u64,
    deadline: Instant,
}

impl IterationPool {
    pub(crate) fn new(total: u64, deadline: Instant) -> Self {
        Self {
            next: AtomicU64::new(0),
            total,
            deadline,
        }
    }

    /// Next unclaimed index, or `None` once the pool is drained, past its deadline or `stop`
    /// has fired. No index is handed out twice.
    pub(crate) fn claim(&self, stop: &StopSignal) -> Option<u64> {
        if stop.is_fired() || Instant::now() >= self.deadline {
            return None;
        }

        self.next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.total).then_some(n + 1)
            })
            .ok()
    }
}

pub(super) async fn run(cfg: SharedIterationsConfig, env: Arc<ScenarioEnv>) -> ExecutorReport {
    let pool = Arc::new(IterationPool::new(
        cfg.iterations,
        Instant::now() + cfg.max_duration,
    ));

    let mut workers = JoinSet::new();
    for scenario_vu in 1..=cfg.vus {
        let vu = Vu::new(env.clone(), scenario_vu);
        let pool = pool.clone();
        let stop = env.stop.clone();
        workers.spawn(async move {
            while let Some(idx) = pool.claim(&stop) {
                vu.invoke(idx).await;
            }
        });
    }

    while let Some(res) = workers.join_next().await {
        if let Err(err) = res
            && err.is_panic()
        {
            tracing::error!(scenario = %env.name, error = %err, "worker panicked");
        }
    }

    let exhausted = pool.next.load(Ordering::Acquire) >= cfg.iterations;
    if !exhausted && !env.stop.is_fired() {
        tracing::info!(
            scenario = %env.name,
            max_duration = ?cfg.max_duration,
            "max_duration reached before all iterations ran"
        );
    }

    env.stats.report(env.stop.is_fired())
}
