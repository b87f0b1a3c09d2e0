use std::sync::Arc;
use std::time::Duration;

use crate::config::{ExecutorConfig, ScenarioConfig};
use crate::error::{Error, Result};
use crate::workload::Workload;

/// A named executor configuration bound to the workload it drives.
#[derive(Clone)]
pub struct Scenario {
    name: String,
    executor: ExecutorConfig,
    start_time: Duration,
    workload: Arc<dyn Workload>,
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field("executor", &self.executor)
            .field("start_time", &self.start_time)
            .finish_non_exhaustive()
    }
}

impl Scenario {
    pub fn new(name: impl Into<String>, executor: ExecutorConfig, workload: impl Workload) -> Self {
        Self::with_workload(name, executor, Arc::new(workload))
    }

    pub fn with_workload(
        name: impl Into<String>,
        executor: ExecutorConfig,
        workload: Arc<dyn Workload>,
    ) -> Self {
        Self {
            name: name.into(),
            executor,
            start_time: Duration::ZERO,
            workload,
        }
    }

    pub fn from_config(
        name: impl Into<String>,
        config: ScenarioConfig,
        workload: Arc<dyn Workload>,
    ) -> Self {
        Self::with_workload(name, config.executor, workload).start_time(config.start_time)
    }

    /// Delay after the start of the run before this scenario begins.
    #[must_use]
    pub fn start_time(mut self, offset: Duration) -> Self {
        self.start_time = offset;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn executor(&self) -> &ExecutorConfig {
        &self.executor
    }

    pub fn offset(&self) -> Duration {
        self.start_time
    }

    pub(crate) fn workload(&self) -> Arc<dyn Workload> {
        self.workload.clone()
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidScenarioName);
        }
        self.executor.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::IterationContext;
    use crate::workload::WorkloadError;

    async fn noop(_ctx: IterationContext) -> std::result::Result<(), WorkloadError> {
        Ok(())
    }

    #[test]
    fn validate_checks_name_and_executor() {
        let ok = Scenario::new("a", ExecutorConfig::shared_iterations(1, 1), noop);
        assert!(ok.validate().is_ok());

        let unnamed = Scenario::new(" ", ExecutorConfig::shared_iterations(1, 1), noop);
        assert!(matches!(unnamed.validate(), Err(Error::InvalidScenarioName)));

        let bad = Scenario::new("b", ExecutorConfig::shared_iterations(0, 1), noop);
        assert!(matches!(bad.validate(), Err(Error::InvalidVus)));
    }

    #[test]
    fn from_config_carries_start_time() {
        let yaml = "executor: shared-iterations\nvus: 1\niterations: 1\nstartTime: 3m\n";
        let cfg: ScenarioConfig = serde_yaml::from_str(yaml).unwrap_or_else(|e| panic!("{e}"));
        let s = Scenario::from_config("late", cfg, Arc::new(noop));
        assert_eq!(s.offset(), Duration::from_secs(180));
        assert_eq!(s.name(), "late");
    }
}
