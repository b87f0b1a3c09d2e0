use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MetricKind {
    /// Running sum of non-negative deltas.
    Counter,
    /// Share of `true` samples in a boolean stream.
    Rate,
    /// Numeric observations kept for percentile queries.
    Trend,
}

#[derive(Debug, Default)]
pub(crate) struct RateCells {
    pub(crate) total: AtomicU64,
    pub(crate) hits: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub struct CounterHandle(Arc<AtomicU64>);

impl CounterHandle {
    #[inline]
    pub fn add(&self, delta: u64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RateHandle(Arc<RateCells>);

impl RateHandle {
    #[inline]
    pub fn add(&self, hit: bool) {
        if hit {
            self.0.hits.fetch_add(1, Ordering::Relaxed);
        }
        self.0.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns `(hits, total)`.
    pub fn get(&self) -> (u64, u64) {
        (
            self.0.hits.load(Ordering::Relaxed),
            self.0.total.load(Ordering::Relaxed),
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrendHandle(Arc<Mutex<Vec<f64>>>);

impl TrendHandle {
    #[inline]
    pub fn add(&self, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(Error::NonFiniteValue(value));
        }
        self.0.lock().push(value);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn samples(&self) -> Vec<f64> {
        self.0.lock().clone()
    }
}

/// Shared storage of one metric. Cloning yields another handle to the same cells.
#[derive(Debug, Clone)]
pub enum MetricHandle {
    Counter(CounterHandle),
    Rate(RateHandle),
    Trend(TrendHandle),
}

impl MetricHandle {
    pub fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter(CounterHandle::default()),
            MetricKind::Rate => Self::Rate(RateHandle::default()),
            MetricKind::Trend => Self::Trend(TrendHandle::default()),
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter(_) => MetricKind::Counter,
            Self::Rate(_) => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_handles_start_empty() {
        match MetricHandle::new(MetricKind::Counter) {
            MetricHandle::Counter(c) => assert_eq!(c.get(), 0),
            _ => panic!("expected counter"),
        }

        match MetricHandle::new(MetricKind::Rate) {
            MetricHandle::Rate(r) => assert_eq!(r.get(), (0, 0)),
            _ => panic!("expected rate"),
        }

        match MetricHandle::new(MetricKind::Trend) {
            MetricHandle::Trend(t) => assert!(t.is_empty()),
            _ => panic!("expected trend"),
        }
    }

    #[test]
    fn cloned_handles_share_cells() {
        let c = CounterHandle::default();
        let c2 = c.clone();
        c.add(2);
        c2.add(3);
        assert_eq!(c.get(), 5);

        let r = RateHandle::default();
        r.add(true);
        r.clone().add(false);
        assert_eq!(r.get(), (1, 2));
    }

    #[test]
    fn trend_rejects_non_finite_values() {
        let t = TrendHandle::default();
        assert!(t.add(f64::NAN).is_err());
        assert_eq!(t.add(f64::INFINITY), Err(Error::NonFiniteValue(f64::INFINITY)));
        t.add(0.0).unwrap_or_else(|e| panic!("{e}"));
        t.add(-1.5).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn kind_round_trips_through_strings() {
        assert_eq!(MetricKind::Trend.to_string(), "trend");
        assert_eq!("rate".parse::<MetricKind>(), Ok(MetricKind::Rate));
    }
}
