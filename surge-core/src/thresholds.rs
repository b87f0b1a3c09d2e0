use std::fmt;

use surge_metrics::{MetricKind, MetricValues, Registry, Snapshot};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    /// `hits / total` of a rate metric.
    Rate,
    /// `p(N)` with `N` in `(0, 100]`.
    Percentile(f64),
    Avg,
    Med,
    Min,
    Max,
    /// Counter total, or number of samples of a rate / trend.
    Count,
}

impl Aggregation {
    /// Whether this aggregation can be computed for a metric of `kind`.
    pub fn applies_to(self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Counter => matches!(self, Self::Count),
            MetricKind::Rate => matches!(self, Self::Rate | Self::Count),
            MetricKind::Trend => !matches!(self, Self::Rate),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rate => f.write_str("rate"),
            Self::Percentile(p) => write!(f, "p({p})"),
            Self::Avg => f.write_str("avg"),
            Self::Med => f.write_str("med"),
            Self::Min => f.write_str("min"),
            Self::Max => f.write_str("max"),
            Self::Count => f.write_str("count"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparator {
    pub fn compare(self, left: f64, right: f64) -> bool {
        match self {
            Self::Lt => left < right,
            Self::Le => left <= right,
            Self::Gt => left > right,
            Self::Ge => left >= right,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        })
    }
}

/// A pass/fail condition on one metric, e.g. `p(95)<500` on `http_req_duration`.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdExpr {
    pub metric: String,
    pub aggregation: Aggregation,
    pub comparator: Comparator,
    pub bound: f64,
}

impl fmt::Display for ThresholdExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.aggregation, self.comparator, self.bound)
    }
}

impl ThresholdExpr {
    pub fn new(
        metric: impl Into<String>,
        aggregation: Aggregation,
        comparator: Comparator,
        bound: f64,
    ) -> Self {
        Self {
            metric: metric.into(),
            aggregation,
            comparator,
            bound,
        }
    }

    /// Parses the textual form: `rate>0.95`, `p(99.9) <= 50`, `avg<200`, `count>=1`.
    pub fn parse(metric: impl Into<String>, source: &str) -> Result<Self> {
        let metric = metric.into();
        let invalid = |reason: &str| Error::InvalidThreshold {
            metric: metric.clone(),
            expr: source.to_string(),
            reason: reason.to_string(),
        };

        let s: String = source.chars().filter(|c| !c.is_whitespace()).collect();
        if s.is_empty() {
            return Err(invalid("empty expression"));
        }

        let (op_pos, comparator, op_len) = s
            .char_indices()
            .find_map(|(i, c)| {
                let next_eq = s[i + c.len_utf8()..].starts_with('=');
                match (c, next_eq) {
                    ('<', true) => Some((i, Comparator::Le, 2)),
                    ('<', false) => Some((i, Comparator::Lt, 1)),
                    ('>', true) => Some((i, Comparator::Ge, 2)),
                    ('>', false) => Some((i, Comparator::Gt, 1)),
                    _ => None,
                }
            })
            .ok_or_else(|| invalid("missing comparator (<, <=, >, >=)"))?;

        let left = &s[..op_pos];
        let right = &s[op_pos + op_len..];
        if left.is_empty() || right.is_empty() {
            return Err(invalid("expected `<aggregation><comparator><number>`"));
        }

        let aggregation = match left.to_ascii_lowercase().as_str() {
            "rate" => Aggregation::Rate,
            "avg" | "mean" => Aggregation::Avg,
            "med" => Aggregation::Med,
            "min" => Aggregation::Min,
            "max" => Aggregation::Max,
            "count" => Aggregation::Count,
            other => {
                let inner = other
                    .strip_prefix("p(")
                    .and_then(|v| v.strip_suffix(')'))
                    .ok_or_else(|| invalid(&format!("unknown aggregation `{left}`")))?;
                let p: f64 = inner
                    .parse()
                    .map_err(|_| invalid("percentile is not a number"))?;
                if !(p > 0.0 && p <= 100.0) {
                    return Err(invalid("percentile out of range (0, 100]"));
                }
                Aggregation::Percentile(p)
            }
        };

        let bound: f64 = right
            .parse()
            .map_err(|_| invalid("bound is not a number"))?;
        if !bound.is_finite() {
            return Err(invalid("bound must be finite"));
        }

        Ok(Self {
            metric,
            aggregation,
            comparator,
            bound,
        })
    }

    /// The aggregated value this expression compares, or `None` if the metric is missing or
    /// has no samples.
    pub fn observe(&self, snapshot: &Snapshot) -> Option<f64> {
        let metric = snapshot.get(&self.metric)?;
        match (&metric.values, self.aggregation) {
            (MetricValues::Counter { total }, Aggregation::Count) => Some(*total as f64),
            (values @ MetricValues::Rate { .. }, Aggregation::Rate) => values.rate(),
            (MetricValues::Rate { total, .. }, Aggregation::Count) if *total > 0 => {
                Some(*total as f64)
            }
            (MetricValues::Trend(t), agg) => match agg {
                Aggregation::Percentile(p) => t.percentile(p / 100.0),
                Aggregation::Avg => t.mean(),
                Aggregation::Med => t.median(),
                Aggregation::Min => t.min(),
                Aggregation::Max => t.max(),
                Aggregation::Count if t.count() > 0 => Some(t.count() as f64),
                _ => None,
            },
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdOutcome {
    pub expr: ThresholdExpr,
    pub observed: Option<f64>,
    pub passed: bool,
}

/// Checks that every threshold names a registered metric and an aggregation that fits its
/// kind.
pub fn validate(thresholds: &[ThresholdExpr], registry: &Registry) -> Result<()> {
    thresholds.iter().try_for_each(|t| validate_one(t, registry))
}

pub(crate) fn validate_one(t: &ThresholdExpr, registry: &Registry) -> Result<()> {
    let kind = registry
        .kind_of(&t.metric)
        .ok_or_else(|| Error::InvalidThreshold {
            metric: t.metric.clone(),
            expr: t.to_string(),
            reason: "unknown metric".to_string(),
        })?;

    if !t.aggregation.applies_to(kind) {
        return Err(Error::ThresholdMismatch {
            metric: t.metric.clone(),
            kind,
            expr: t.to_string(),
        });
    }
    Ok(())
}

/// Evaluates every threshold against `snapshot`. A threshold with nothing to observe fails.
pub fn evaluate(thresholds: &[ThresholdExpr], snapshot: &Snapshot) -> Vec<ThresholdOutcome> {
    thresholds
        .iter()
        .map(|expr| {
            let observed = expr.observe(snapshot);
            let passed = observed.is_some_and(|v| expr.comparator.compare(v, expr.bound));
            ThresholdOutcome {
                expr: expr.clone(),
                observed,
                passed,
            }
        })
        .collect()
}
