use crate::metrics::MetricKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("metric name must be a non-empty string")]
    InvalidName,

    #[error("metric `{name}` is already registered as a {existing} (requested {requested})")]
    DuplicateMetric {
        name: String,
        existing: MetricKind,
        requested: MetricKind,
    },

    #[error("unknown metric `{0}`")]
    UnknownMetric(String),

    #[error("metric `{name}` is a {actual}, not a {expected}")]
    KindMismatch {
        name: String,
        expected: MetricKind,
        actual: MetricKind,
    },

    #[error("trend values must be finite (got {0})")]
    NonFiniteValue(f64),
}
