mod support;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use surge_core::{
    ExecutorConfig, IterationContext, RampingArrivalRateConfig, Registry, RunOptions, Scenario,
    ScenarioStatus, Stage, TestRun, Workload, WorkloadError, metrics,
};

fn sleeper(d: Duration) -> impl Workload {
    move |_ctx: IterationContext| async move {
        tokio::time::sleep(d).await;
        Ok::<(), WorkloadError>(())
    }
}

async fn run_one(scenario: Scenario, options: RunOptions) -> anyhow::Result<surge_core::RunResult> {
    let mut run = TestRun::new(Arc::new(Registry::new()))?;
    run.scenario(scenario)?.options(options);
    Ok(run.run().await?)
}

#[tokio::test(start_paused = true)]
async fn panicking_invocation_counts_as_an_error_and_keeps_the_worker() -> anyhow::Result<()> {
    let workload = |ctx: IterationContext| async move {
        if ctx.iteration() == 0 {
            panic!("boom");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok::<(), WorkloadError>(())
    };

    let registry = Arc::new(Registry::new());
    let mut run = TestRun::new(registry.clone())?;
    run.scenario(Scenario::new(
        "pool",
        ExecutorConfig::shared_iterations(1, 5),
        workload,
    ))?;
    let result = run.run().await?;

    let report = &result.scenarios[0];
    assert_eq!(report.status, ScenarioStatus::Complete);
    assert_eq!(report.iterations, 5);
    assert_eq!(report.errors, 1);
    assert_eq!(result.metrics.counter(metrics::ITERATIONS), Some(5));
    assert_eq!(result.metrics.counter(metrics::ITERATION_ERRORS), Some(1));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn shared_iterations_claims_every_index_once() -> anyhow::Result<()> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let vus_seen = Arc::new(Mutex::new(BTreeSet::new()));

    let workload = {
        let seen = seen.clone();
        let vus_seen = vus_seen.clone();
        move |ctx: IterationContext| {
            let seen = seen.clone();
            let vus_seen = vus_seen.clone();
            async move {
                seen.lock().push(ctx.iteration());
                vus_seen.lock().insert(ctx.scenario_vu());
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<(), WorkloadError>(())
            }
        }
    };

    let result = run_one(
        Scenario::new("pool", ExecutorConfig::shared_iterations(5, 23), workload),
        RunOptions::default(),
    )
    .await?;

    let mut indices = seen.lock().clone();
    indices.sort_unstable();
    assert_eq!(indices, (0..23).collect::<Vec<u64>>());
    assert_eq!(*vus_seen.lock(), (1..=5).collect::<BTreeSet<u64>>());

    let report = result
        .scenario("pool")
        .ok_or_else(|| anyhow::anyhow!("missing scenario report"))?;
    assert_eq!(report.status, ScenarioStatus::Complete);
    assert_eq!(report.iterations, 23);
    assert_eq!(report.peak_vus, 5);
    assert_eq!(result.metrics.counter(metrics::ITERATIONS), Some(23));
    assert_eq!(
        result
            .metrics
            .trend(metrics::ITERATION_DURATION)
            .map(|t| t.count()),
        Some(23)
    );
    assert!(!result.aborted);
    assert!(result.passed);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn shared_iterations_stops_claiming_at_max_duration() -> anyhow::Result<()> {
    let executor: ExecutorConfig = serde_yaml::from_str(
        "executor: shared-iterations\nvus: 2\niterations: 100\nmaxDuration: 1s\n",
    )?;
    let result = run_one(
        Scenario::new("capped", executor, sleeper(Duration::from_millis(300))),
        RunOptions::default(),
    )
    .await?;

    let report = &result.scenarios[0];
    assert_eq!(report.status, ScenarioStatus::Complete);
    // Claims at 0, 300, 600 and 900 ms per VU; the ones in flight at 1s still finish.
    assert_eq!(report.iterations, 8);
    assert!(result.elapsed >= Duration::from_millis(1200));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn constant_arrival_rate_keeps_up_with_fast_invocations() -> anyhow::Result<()> {
    let result = run_one(
        Scenario::new(
            "fast",
            ExecutorConfig::constant_arrival_rate(100, Duration::from_secs(2), 10, 50),
            sleeper(Duration::from_millis(10)),
        ),
        RunOptions::default(),
    )
    .await?;

    let report = &result.scenarios[0];
    assert_eq!(report.dropped, 0);
    assert_eq!(report.iterations, 200);
    assert!(report.peak_vus <= 50);
    assert_eq!(result.metrics.counter(metrics::DROPPED_ITERATIONS), Some(0));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn constant_arrival_rate_drops_tickets_without_capacity() -> anyhow::Result<()> {
    let result = run_one(
        Scenario::new(
            "slow",
            ExecutorConfig::constant_arrival_rate(100, Duration::from_secs(2), 10, 50),
            sleeper(Duration::from_millis(600)),
        ),
        RunOptions::default(),
    )
    .await?;

    let report = &result.scenarios[0];
    assert!(report.dropped > 0, "expected scheduling misses: {report:?}");
    assert_eq!(report.iterations + report.dropped, 200);
    assert_eq!(report.peak_vus, 50);
    assert_eq!(
        result.metrics.counter(metrics::DROPPED_ITERATIONS),
        Some(report.dropped)
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn constant_arrival_rate_honours_time_unit() -> anyhow::Result<()> {
    let executor: ExecutorConfig = serde_yaml::from_str(
        "executor: constant-arrival-rate\nrate: 30\ntimeUnit: 1m\nduration: 10s\npreAllocatedVUs: 2\n",
    )?;
    let result = run_one(
        Scenario::new("per-minute", executor, sleeper(Duration::from_millis(5))),
        RunOptions::default(),
    )
    .await?;

    assert_eq!(result.scenarios[0].iterations, 5);
    assert_eq!(result.scenarios[0].dropped, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn ramping_arrival_rate_offers_the_ramp_integral() -> anyhow::Result<()> {
    // 0 -> 20/s over 2s, then 20/s for 1s: 20 + 20 = 40 arrivals.
    let executor = ExecutorConfig::RampingArrivalRate(RampingArrivalRateConfig {
        start_rate: 0,
        time_unit: Duration::from_secs(1),
        stages: vec![
            Stage::new(Duration::from_secs(2), 20),
            Stage::new(Duration::from_secs(1), 20),
        ],
        pre_allocated_vus: 2,
        max_vus: Some(10),
    });
    let result = run_one(
        Scenario::new("ramp", executor, sleeper(Duration::from_millis(20))),
        RunOptions::default(),
    )
    .await?;

    let report = &result.scenarios[0];
    assert_eq!(report.iterations + report.dropped, 40);
    assert_eq!(report.dropped, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn ramping_vus_registers_only_the_vus_the_ramp_has_reached() -> anyhow::Result<()> {
    let first_round = Arc::new(Mutex::new(None));
    let progress: surge_core::ProgressFn = {
        let first_round = first_round.clone();
        Arc::new(move |u: surge_core::ProgressUpdate| {
            first_round.lock().get_or_insert((u.elapsed, u.vus, u.active_vus));
        })
    };

    let mut run = TestRun::new(Arc::new(Registry::new()))?;
    run.scenario(Scenario::new(
        "ramp",
        ExecutorConfig::ramping_vus(0, vec![Stage::new(Duration::from_secs(2), 4)]),
        sleeper(Duration::from_millis(100)),
    ))?
    .options(RunOptions {
        progress: Some(progress),
        ..RunOptions::default()
    });
    let control = run.control();
    let task = tokio::spawn(run.run());

    tokio::time::sleep(Duration::from_millis(1200)).await;
    control.abort();
    let result = task.await??;

    let (elapsed, vus, active_vus) =
        (*first_round.lock()).ok_or_else(|| anyhow::anyhow!("no progress round"))?;
    assert!(elapsed <= Duration::from_millis(1100), "{elapsed:?}");
    assert!(vus <= 2, "vus={vus} at {elapsed:?}");
    assert!(active_vus <= 2, "active_vus={active_vus} at {elapsed:?}");

    let report = &result.scenarios[0];
    assert_eq!(report.status, ScenarioStatus::Stopped);
    assert!(report.peak_vus <= 3, "{report:?}");
    assert!(report.peak_vus >= 1, "{report:?}");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn ramping_vus_follows_the_target() -> anyhow::Result<()> {
    let active_max = Arc::new(Mutex::new(0u64));
    let workload = {
        let active_max = active_max.clone();
        move |ctx: IterationContext| {
            let active_max = active_max.clone();
            async move {
                {
                    let mut max = active_max.lock();
                    *max = (*max).max(ctx.scenario_vu());
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<(), WorkloadError>(())
            }
        }
    };

    let executor = ExecutorConfig::ramping_vus(
        0,
        vec![
            Stage::new(Duration::from_secs(2), 4),
            Stage::new(Duration::from_secs(1), 4),
            Stage::new(Duration::from_secs(1), 0),
        ],
    );
    let result = run_one(Scenario::new("ramp", executor, workload), RunOptions::default()).await?;

    let report = &result.scenarios[0];
    assert_eq!(report.status, ScenarioStatus::Complete);
    assert_eq!(report.peak_vus, 4);
    assert_eq!(*active_max.lock(), 4);
    // About 8.5 VU-seconds of activity at 10 invocations per VU-second.
    assert!(report.iterations > 40, "{report:?}");
    assert!(report.iterations < 160, "{report:?}");
    assert!(result.elapsed >= Duration::from_secs(4));
    Ok(())
}
