use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use super::OutputFormatter;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _plan_path: &Path, _plan: &surge_core::TestPlan) {}

    fn progress(&self) -> Option<surge_core::ProgressFn> {
        Some(Arc::new(move |u: surge_core::ProgressUpdate| {
            let line = build_progress_line(&u);
            emit_json_line(&line);
        }))
    }

    fn print_summary(
        &self,
        _result: &surge_core::RunResult,
        report: &surge_core::Report,
    ) -> anyhow::Result<()> {
        let report: serde_json::Value = serde_json::from_str(&report.json)?;
        emit_json_line(&JsonSummaryLine {
            kind: "summary",
            report,
        });
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine<'a> {
    pub kind: &'static str,
    pub tick: u64,
    pub elapsed_ms: u64,
    pub run_state: surge_core::RunState,
    pub scenario: &'a str,
    pub executor: surge_core::ExecutorKind,
    pub status: surge_core::ScenarioStatus,
    pub scenario_elapsed_ms: u64,
    pub total_duration_ms: u64,
    pub iterations: u64,
    pub errors: u64,
    pub dropped: u64,
    pub active_vus: u64,
    pub vus: u64,
    pub stage: Option<JsonStage>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonStage {
    /// 1-based.
    pub stage: usize,
    pub stages: usize,
    pub target: u64,
    pub stage_remaining_ms: u64,
}

#[derive(Debug, Serialize)]
struct JsonSummaryLine {
    kind: &'static str,
    report: serde_json::Value,
}

fn millis(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn build_progress_line(u: &surge_core::ProgressUpdate) -> JsonProgressLine<'_> {
    JsonProgressLine {
        kind: "progress",
        tick: u.tick,
        elapsed_ms: millis(u.elapsed),
        run_state: u.state,
        scenario: &u.scenario,
        executor: u.executor,
        status: u.status,
        scenario_elapsed_ms: millis(u.scenario_elapsed),
        total_duration_ms: millis(u.total_duration),
        iterations: u.iterations,
        errors: u.errors,
        dropped: u.dropped,
        active_vus: u.active_vus,
        vus: u.vus,
        stage: u.stage.as_ref().map(|s| JsonStage {
            stage: s.index + 1,
            stages: s.count,
            target: s.current_target,
            stage_remaining_ms: millis(s.stage_remaining),
        }),
    }
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::Value;
    use surge_core::{ExecutorKind, ProgressUpdate, RunState, ScenarioStatus, StageSnapshot};

    use super::*;

    #[test]
    fn progress_line_flattens_the_update() {
        let update = ProgressUpdate {
            tick: 3,
            elapsed: Duration::from_millis(3000),
            scenario: "buy".to_string(),
            executor: ExecutorKind::RampingArrivalRate,
            state: RunState::Running,
            status: ScenarioStatus::Running,
            iterations: 120,
            errors: 2,
            dropped: 1,
            active_vus: 4,
            vus: 10,
            scenario_elapsed: Duration::from_millis(2500),
            total_duration: Duration::from_secs(10),
            stage: Some(StageSnapshot {
                index: 0,
                count: 2,
                stage_elapsed: Duration::from_millis(2500),
                stage_remaining: Duration::from_millis(2500),
                start_target: 0,
                end_target: 100,
                current_target: 50,
            }),
        };

        let v: Value = match serde_json::to_value(build_progress_line(&update)) {
            Ok(v) => v,
            Err(err) => panic!("to_value failed: {err}"),
        };
        assert_eq!(v.get("kind").and_then(Value::as_str), Some("progress"));
        assert_eq!(v.get("run_state").and_then(Value::as_str), Some("running"));
        assert_eq!(
            v.get("executor").and_then(Value::as_str),
            Some("ramping-arrival-rate")
        );
        assert_eq!(v.get("scenario_elapsed_ms").and_then(Value::as_u64), Some(2500));
        assert_eq!(v.pointer("/stage/stage").and_then(Value::as_u64), Some(1));
        assert_eq!(v.pointer("/stage/target").and_then(Value::as_u64), Some(50));
    }
}
