use std::time::Duration;

use surge_metrics::{CounterHandle, MetricKind, RateHandle, Registry, TrendHandle};

use crate::error::Result;

pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const ITERATION_ERRORS: &str = "iteration_errors";
pub const DROPPED_ITERATIONS: &str = "dropped_iterations";
pub const CHECKS: &str = "checks";

/// Metrics every run records, registered up front so thresholds can refer to them.
#[derive(Debug, Clone)]
pub struct BuiltinMetrics {
    pub http_reqs: CounterHandle,
    /// Milliseconds.
    pub http_req_duration: TrendHandle,
    /// Hit = request failed (transport error or status >= 400).
    pub http_req_failed: RateHandle,
    pub iterations: CounterHandle,
    /// Milliseconds.
    pub iteration_duration: TrendHandle,
    pub iteration_errors: CounterHandle,
    pub dropped_iterations: CounterHandle,
    pub checks: RateHandle,
}

impl BuiltinMetrics {
    pub fn register(registry: &Registry) -> Result<Self> {
        let specs = [
            (HTTP_REQS, MetricKind::Counter),
            (HTTP_REQ_DURATION, MetricKind::Trend),
            (HTTP_REQ_FAILED, MetricKind::Rate),
            (ITERATIONS, MetricKind::Counter),
            (ITERATION_DURATION, MetricKind::Trend),
            (ITERATION_ERRORS, MetricKind::Counter),
            (DROPPED_ITERATIONS, MetricKind::Counter),
            (CHECKS, MetricKind::Rate),
        ];
        for (name, kind) in specs {
            registry.register(name, kind)?;
        }

        Ok(Self {
            http_reqs: registry.counter(HTTP_REQS)?,
            http_req_duration: registry.trend(HTTP_REQ_DURATION)?,
            http_req_failed: registry.rate(HTTP_REQ_FAILED)?,
            iterations: registry.counter(ITERATIONS)?,
            iteration_duration: registry.trend(ITERATION_DURATION)?,
            iteration_errors: registry.counter(ITERATION_ERRORS)?,
            dropped_iterations: registry.counter(DROPPED_ITERATIONS)?,
            checks: registry.rate(CHECKS)?,
        })
    }
}

/// Records `d` in milliseconds.
pub(crate) fn add_millis(trend: &TrendHandle, d: Duration) {
    // Durations are always finite, so the add cannot fail.
    let _ = trend.add(d.as_secs_f64() * 1000.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_repeatable_and_conflicts_are_reported() {
        let r = Registry::new();
        BuiltinMetrics::register(&r).unwrap_or_else(|e| panic!("{e}"));
        BuiltinMetrics::register(&r).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(r.len(), 8);

        let r = Registry::new();
        r.register(CHECKS, MetricKind::Counter)
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(BuiltinMetrics::register(&r).is_err());
    }

    #[test]
    fn add_millis_converts_durations() {
        let r = Registry::new();
        let m = BuiltinMetrics::register(&r).unwrap_or_else(|e| panic!("{e}"));
        add_millis(&m.iteration_duration, Duration::from_micros(1500));

        let snap = r.snapshot();
        let trend = snap
            .trend(ITERATION_DURATION)
            .unwrap_or_else(|| panic!("missing trend"));
        assert_eq!(trend.samples(), &[1.5]);
    }
}
