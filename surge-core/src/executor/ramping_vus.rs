use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::Instant;

use super::{ExecutorReport, ScenarioEnv, Vu};
use crate::config::RampingVusConfig;
use crate::schedule::RampSchedule;

/// One worker per VU up to the peak target. Worker `k` runs back-to-back invocations while
/// the ramp's current target is at least `k` and sleeps otherwise. A worker only becomes a VU
/// once its gate first opens, so `peak_vus` reflects what the ramp actually reached.
pub(super) async fn run(cfg: RampingVusConfig, env: Arc<ScenarioEnv>) -> ExecutorReport {
    let schedule = Arc::new(RampSchedule::new(cfg.start_vus, cfg.stages));
    let started = Instant::now();

    let mut workers = JoinSet::new();
    for scenario_vu in 1..=schedule.peak() {
        let env = env.clone();
        let schedule = schedule.clone();
        let stop = env.stop.clone();

        workers.spawn(async move {
            let mut vu: Option<Vu> = None;
            loop {
                if stop.is_fired() {
                    break;
                }
                let elapsed = started.elapsed();
                if schedule.is_done(elapsed) {
                    break;
                }

                if scenario_vu > schedule.target_at(elapsed) {
                    let wait = schedule.next_recheck_in(elapsed, scenario_vu);
                    tokio::select! {
                        biased;
                        _ = stop.wait() => break,
                        _ = tokio::time::sleep(wait.max(std::time::Duration::from_millis(1))) => {}
                    }
                    continue;
                }

                vu.get_or_insert_with(|| Vu::new(env.clone(), scenario_vu))
                    .invoke_next()
                    .await;
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

    env.stats.report(env.stop.is_fired())
}
