use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

mod format;
mod progress;

use format::{format_duration, format_rate};
use progress::HumanProgress;

use super::OutputFormatter;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
        }
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, plan_path: &Path, plan: &surge_core::TestPlan) {
        println!("plan: {}", plan_path.display());
        for (name, s) in &plan.scenarios {
            println!(
                "scenario: {name} executor={} exec={} start={} duration={} max_vus={}",
                s.executor.kind(),
                s.exec.as_deref().unwrap_or("-"),
                format_duration(s.start_time),
                format_duration(s.executor.total_duration()),
                s.executor.max_vus(),
            );
        }
        if !plan.scenarios.is_empty() {
            println!();
        }
    }

    fn progress(&self) -> Option<surge_core::ProgressFn> {
        let progress = self.progress.clone();
        // Last (scenario elapsed, iterations) seen per scenario.
        let prev: Arc<Mutex<HashMap<String, (Duration, u64)>>> =
            Arc::new(Mutex::new(HashMap::new()));

        Some(Arc::new(move |u: surge_core::ProgressUpdate| {
            let prev_seen = {
                let mut inner = prev.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                inner.insert(u.scenario.clone(), (u.scenario_elapsed, u.iterations))
            };
            let (prev_elapsed, prev_iters) = prev_seen.unwrap_or_default();
            let dt = u.scenario_elapsed.saturating_sub(prev_elapsed).as_secs_f64().max(1e-9);
            let iters_per_sec = u.iterations.saturating_sub(prev_iters) as f64 / dt;

            let mut message = format!(
                "{} vus={}/{} elapsed={} iters={} iters/s={} errors={}",
                u.status,
                u.active_vus,
                u.vus,
                format_duration(u.scenario_elapsed),
                u.iterations,
                format_rate(iters_per_sec),
                u.errors,
            );
            if u.executor.is_arrival_rate() {
                message.push_str(&format!(" dropped={}", u.dropped));
            }
            if let Some(stage) = &u.stage {
                message.push_str(&format!(
                    " stage={}/{} target={} stage_remaining={}",
                    stage.index + 1,
                    stage.count,
                    stage.current_target,
                    format_duration(stage.stage_remaining)
                ));
            }

            let total = (!u.total_duration.is_zero()).then_some(u.total_duration);
            progress.update(&u.scenario, total, u.scenario_elapsed, message);
        }))
    }

    fn print_summary(
        &self,
        result: &surge_core::RunResult,
        report: &surge_core::Report,
    ) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", report.text);

        let failed: Vec<_> = result.failed_thresholds().collect();
        if !failed.is_empty() {
            eprintln!("thresholds failed:");
            for t in failed {
                match t.observed {
                    Some(obs) => eprintln!("  {}: {} (observed {obs})", t.expr.metric, t.expr),
                    None => eprintln!("  {}: {} (no data)", t.expr.metric, t.expr),
                }
            }
        }

        Ok(())
    }
}
