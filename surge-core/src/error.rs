use surge_metrics::MetricKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("`vus` must be a positive integer")]
    InvalidVus,

    #[error("`iterations` must be >= `vus`")]
    InvalidIterations,

    #[error("`rate` must be a positive integer")]
    InvalidRate,

    #[error("`time_unit` must be a positive duration")]
    InvalidTimeUnit,

    #[error("`{0}` must be a positive duration")]
    InvalidDuration(&'static str),

    #[error("`stages` must be a non-empty array of {{ duration, target }}: {0}")]
    InvalidStages(&'static str),

    #[error("`pre_allocated_vus` must be a positive integer")]
    InvalidPreAllocatedVus,

    #[error("`max_vus` must be >= `pre_allocated_vus`")]
    InvalidMaxVus,

    #[error("scenario name must not be empty")]
    InvalidScenarioName,

    #[error("duplicate scenario `{0}`")]
    DuplicateScenario(String),

    #[error("a run needs at least one scenario")]
    NoScenarios,

    #[error("invalid threshold `{expr}` on `{metric}`: {reason}")]
    InvalidThreshold {
        metric: String,
        expr: String,
        reason: String,
    },

    #[error("threshold `{expr}` cannot be applied to {kind} metric `{metric}`")]
    ThresholdMismatch {
        metric: String,
        kind: MetricKind,
        expr: String,
    },

    #[error(transparent)]
    Metrics(#[from] surge_metrics::Error),

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error comes from invalid user input rather than from running the test.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        !matches!(self, Self::Join(_) | Self::Serialize(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_plumbing_is_not_configuration() {
        assert!(Error::InvalidVus.is_configuration());
        assert!(Error::NoScenarios.is_configuration());
        assert!(Error::Metrics(surge_metrics::Error::InvalidName).is_configuration());

        let ser = serde_json::from_str::<u8>("x").err();
        let ser = ser.unwrap_or_else(|| panic!("expected a parse error"));
        assert!(!Error::Serialize(ser).is_configuration());
    }
}
