#![forbid(unsafe_code)]

mod context;
mod coordinator;
mod executor;
mod result;
mod scenario;
mod signal;
mod transport;
mod workload;

pub mod config;
pub mod error;
pub mod metrics;
pub mod plan;
pub mod report;
pub mod schedule;
pub mod thresholds;

pub use config::{
    ConstantArrivalRateConfig, ExecutorConfig, ExecutorKind, RampingArrivalRateConfig,
    RampingVusConfig, ScenarioConfig, SharedIterationsConfig, Stage,
};
pub use context::{Http, HttpResponse, IterationContext};
pub use coordinator::{
    ErrorCeiling, ProgressFn, ProgressUpdate, RunControl, RunOptions, RunState, TestRun, run_test,
};
pub use error::{Error, Result};
pub use executor::ExecutorReport;
pub use metrics::BuiltinMetrics;
pub use plan::{TestPlan, ThresholdList};
pub use report::Report;
pub use result::{CheckSummary, RunResult, ScenarioReport, ScenarioStatus};
pub use scenario::Scenario;
pub use schedule::StageSnapshot;
pub use signal::StopSignal;
pub use thresholds::{Aggregation, Comparator, ThresholdExpr, ThresholdOutcome};
pub use transport::HttpTransport;
pub use workload::{Workload, WorkloadError, WorkloadFuture};

pub use surge_metrics::{CounterHandle, MetricKind, RateHandle, Registry, Snapshot, TrendHandle};
