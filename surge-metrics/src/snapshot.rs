use crate::metrics::MetricKind;

/// Point-in-time copy of every registered metric, in registration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub(crate) metrics: Vec<MetricSnapshot>,
}

impl Snapshot {
    pub fn metrics(&self) -> &[MetricSnapshot] {
        &self.metrics
    }

    pub fn get(&self, name: &str) -> Option<&MetricSnapshot> {
        self.metrics.iter().find(|m| m.name == name)
    }

    pub fn counter(&self, name: &str) -> Option<u64> {
        match self.get(name)?.values {
            MetricValues::Counter { total } => Some(total),
            _ => None,
        }
    }

    /// Returns `(hits, total)` of a rate metric.
    pub fn rate(&self, name: &str) -> Option<(u64, u64)> {
        match self.get(name)?.values {
            MetricValues::Rate { hits, total } => Some((hits, total)),
            _ => None,
        }
    }

    pub fn trend(&self, name: &str) -> Option<&TrendSnapshot> {
        match &self.get(name)?.values {
            MetricValues::Trend(t) => Some(t),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSnapshot {
    pub name: String,
    pub kind: MetricKind,
    pub values: MetricValues,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricValues {
    Counter { total: u64 },
    Rate { hits: u64, total: u64 },
    Trend(TrendSnapshot),
}

impl MetricValues {
    /// `hits / total` for rates; `None` for other kinds or an empty stream.
    pub fn rate(&self) -> Option<f64> {
        match self {
            Self::Rate { hits, total } if *total > 0 => Some(*hits as f64 / *total as f64),
            _ => None,
        }
    }
}

/// Sorted trend samples.
///
/// Percentiles use `rank = ceil(p * n) - 1`, clamped to `[0, n - 1]`, over the sorted sequence.
/// The same samples always produce the same answer regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrendSnapshot {
    sorted: Vec<f64>,
    sum: f64,
}

impl TrendSnapshot {
    pub fn from_samples(mut samples: Vec<f64>) -> Self {
        samples.sort_by(f64::total_cmp);
        let sum = samples.iter().sum();
        Self {
            sorted: samples,
            sum,
        }
    }

    pub fn count(&self) -> u64 {
        self.sorted.len() as u64
    }

    pub fn samples(&self) -> &[f64] {
        &self.sorted
    }

    pub fn min(&self) -> Option<f64> {
        self.sorted.first().copied()
    }

    pub fn max(&self) -> Option<f64> {
        self.sorted.last().copied()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.sorted.is_empty() {
            return None;
        }
        Some(self.sum / self.sorted.len() as f64)
    }

    pub fn median(&self) -> Option<f64> {
        self.percentile(0.5)
    }

    /// `p` is a fraction in `[0, 1]`; values outside are clamped.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        let n = self.sorted.len();
        if n == 0 || p.is_nan() {
            return None;
        }

        let p = p.clamp(0.0, 1.0);
        let rank = (p * n as f64).ceil() as i64 - 1;
        let idx = rank.clamp(0, n as i64 - 1) as usize;
        self.sorted.get(idx).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_uses_ceil_rank() {
        let t = TrendSnapshot::from_samples(vec![50.0, 20.0, 40.0, 10.0, 30.0]);
        assert_eq!(t.percentile(0.95), Some(50.0));
        assert_eq!(t.percentile(0.5), Some(30.0));
        assert_eq!(t.percentile(0.2), Some(10.0));
        assert_eq!(t.percentile(0.21), Some(20.0));
        assert_eq!(t.percentile(0.0), Some(10.0));
        assert_eq!(t.percentile(1.0), Some(50.0));
    }

    #[test]
    fn empty_trend_has_no_stats() {
        let t = TrendSnapshot::default();
        assert_eq!(t.count(), 0);
        assert_eq!(t.min(), None);
        assert_eq!(t.max(), None);
        assert_eq!(t.mean(), None);
        assert_eq!(t.percentile(0.95), None);
    }

    #[test]
    fn trend_stats_are_order_independent() {
        let a = TrendSnapshot::from_samples(vec![3.0, 1.0, 2.0]);
        let b = TrendSnapshot::from_samples(vec![1.0, 2.0, 3.0]);
        assert_eq!(a, b);
        assert_eq!(a.mean(), Some(2.0));
        assert_eq!(a.min(), Some(1.0));
        assert_eq!(a.max(), Some(3.0));
        assert_eq!(a.median(), Some(2.0));
    }

    #[test]
    fn rate_value_divides_hits_by_total() {
        assert_eq!(MetricValues::Rate { hits: 95, total: 100 }.rate(), Some(0.95));
        assert_eq!(MetricValues::Rate { hits: 0, total: 0 }.rate(), None);
        assert_eq!(MetricValues::Counter { total: 3 }.rate(), None);
    }
}
