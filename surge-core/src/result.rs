use std::time::Duration;

use serde::Serialize;
use surge_metrics::Snapshot;

use crate::config::ExecutorKind;
use crate::thresholds::ThresholdOutcome;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::EnumString, strum::Display,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioStatus {
    Pending,
    Running,
    /// The executor ran out of work on its own.
    Complete,
    /// The executor returned after its stop signal fired.
    Stopped,
    /// Still running when the abort grace period ran out; its task was cancelled.
    ForceTerminated,
    /// The run was aborted before the scenario's start time.
    Skipped,
}

impl ScenarioStatus {
    pub fn is_finished(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioReport {
    pub name: String,
    pub executor: ExecutorKind,
    pub status: ScenarioStatus,
    pub start_time: Duration,
    /// Offset from the start of the run.
    pub started_at: Option<Duration>,
    pub finished_at: Option<Duration>,
    pub iterations: u64,
    pub errors: u64,
    pub dropped: u64,
    pub peak_vus: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSummary {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

/// Final state of a run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub elapsed: Duration,
    pub aborted: bool,
    pub abort_reason: Option<String>,
    pub scenarios: Vec<ScenarioReport>,
    pub metrics: Snapshot,
    pub checks: Vec<CheckSummary>,
    pub thresholds: Vec<ThresholdOutcome>,
    /// Every threshold passed. Aborting alone does not fail a run.
    pub passed: bool,
}

impl RunResult {
    pub fn scenario(&self, name: &str) -> Option<&ScenarioReport> {
        self.scenarios.iter().find(|s| s.name == name)
    }

    pub fn failed_thresholds(&self) -> impl Iterator<Item = &ThresholdOutcome> {
        self.thresholds.iter().filter(|t| !t.passed)
    }
}
