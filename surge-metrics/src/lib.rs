#![forbid(unsafe_code)]

pub mod error;
pub mod metrics;
pub mod registry;
pub mod snapshot;

pub use error::{Error, Result};
pub use metrics::{CounterHandle, MetricHandle, MetricKind, RateHandle, TrendHandle};
pub use registry::{MetricId, Registry};
pub use snapshot::{MetricSnapshot, MetricValues, Snapshot, TrendSnapshot};
