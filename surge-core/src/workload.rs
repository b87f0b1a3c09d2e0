use std::future::Future;
use std::pin::Pin;

use crate::context::IterationContext;

/// Why one invocation of a workload failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkloadError {
    /// The workload cannot run as configured (bad URL, unknown item, ...). Aborts the run.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// This iteration failed; counted in `iteration_errors` and the run goes on.
    #[error("{0}")]
    Failed(String),
}

impl WorkloadError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

impl From<serde_json::Error> for WorkloadError {
    fn from(value: serde_json::Error) -> Self {
        Self::Failed(format!("invalid json: {value}"))
    }
}

pub type WorkloadFuture = Pin<Box<dyn Future<Output = Result<(), WorkloadError>> + Send>>;

/// The user function a scenario drives. Any `Fn(IterationContext) -> impl Future` closure
/// qualifies.
pub trait Workload: Send + Sync + 'static {
    fn call(&self, ctx: IterationContext) -> WorkloadFuture;
}

impl<F, Fut> Workload for F
where
    F: Fn(IterationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), WorkloadError>> + Send + 'static,
{
    fn call(&self, ctx: IterationContext) -> WorkloadFuture {
        Box::pin(self(ctx))
    }
}
