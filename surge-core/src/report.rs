use std::fmt::Write as _;
use std::time::Duration;

use serde::Serialize;
use surge_metrics::{MetricSnapshot, MetricValues, TrendSnapshot};

use crate::error::Result;
use crate::result::{RunResult, ScenarioReport};
use crate::thresholds::ThresholdOutcome;

const TREND_PERCENTILES: [(&str, f64); 3] = [("p90", 0.90), ("p95", 0.95), ("p99", 0.99)];

/// Rendered summary of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub json: String,
    pub text: String,
}

impl Report {
    pub fn render(result: &RunResult) -> Result<Self> {
        let json = serde_json::to_string_pretty(&JsonReport::from(result))?;
        let text = render_text(result);
        Ok(Self { json, text })
    }
}

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    elapsed_ms: f64,
    aborted: bool,
    abort_reason: Option<&'a str>,
    passed: bool,
    scenarios: Vec<JsonScenario<'a>>,
    metrics: Vec<JsonMetric<'a>>,
    checks: Vec<JsonCheck<'a>>,
    thresholds: Vec<JsonThreshold>,
}

#[derive(Debug, Serialize)]
struct JsonScenario<'a> {
    name: &'a str,
    executor: String,
    status: String,
    start_time_ms: f64,
    started_at_ms: Option<f64>,
    finished_at_ms: Option<f64>,
    iterations: u64,
    errors: u64,
    dropped: u64,
    peak_vus: u64,
}

#[derive(Debug, Serialize)]
struct JsonMetric<'a> {
    name: &'a str,
    kind: String,
    values: JsonValues,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum JsonValues {
    Counter {
        count: u64,
    },
    Rate {
        rate: Option<f64>,
        hits: u64,
        total: u64,
    },
    Trend {
        count: u64,
        min: Option<f64>,
        max: Option<f64>,
        avg: Option<f64>,
        med: Option<f64>,
        p90: Option<f64>,
        p95: Option<f64>,
        p99: Option<f64>,
    },
}

#[derive(Debug, Serialize)]
struct JsonCheck<'a> {
    name: &'a str,
    passes: u64,
    fails: u64,
}

#[derive(Debug, Serialize)]
struct JsonThreshold {
    metric: String,
    expr: String,
    observed: Option<f64>,
    passed: bool,
}

fn millis(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1e6
}

impl<'a> From<&'a RunResult> for JsonReport<'a> {
    fn from(r: &'a RunResult) -> Self {
        Self {
            elapsed_ms: millis(r.elapsed),
            aborted: r.aborted,
            abort_reason: r.abort_reason.as_deref(),
            passed: r.passed,
            scenarios: r.scenarios.iter().map(JsonScenario::from).collect(),
            metrics: r.metrics.metrics().iter().map(JsonMetric::from).collect(),
            checks: r
                .checks
                .iter()
                .map(|c| JsonCheck {
                    name: &c.name,
                    passes: c.passes,
                    fails: c.fails,
                })
                .collect(),
            thresholds: r.thresholds.iter().map(JsonThreshold::from).collect(),
        }
    }
}

impl<'a> From<&'a ScenarioReport> for JsonScenario<'a> {
    fn from(s: &'a ScenarioReport) -> Self {
        Self {
            name: &s.name,
            executor: s.executor.to_string(),
            status: s.status.to_string(),
            start_time_ms: millis(s.start_time),
            started_at_ms: s.started_at.map(millis),
            finished_at_ms: s.finished_at.map(millis),
            iterations: s.iterations,
            errors: s.errors,
            dropped: s.dropped,
            peak_vus: s.peak_vus,
        }
    }
}

impl<'a> From<&'a MetricSnapshot> for JsonMetric<'a> {
    fn from(m: &'a MetricSnapshot) -> Self {
        let values = match &m.values {
            MetricValues::Counter { total } => JsonValues::Counter { count: *total },
            v @ MetricValues::Rate { hits, total } => JsonValues::Rate {
                rate: v.rate(),
                hits: *hits,
                total: *total,
            },
            MetricValues::Trend(t) => JsonValues::Trend {
                count: t.count(),
                min: t.min(),
                max: t.max(),
                avg: t.mean(),
                med: t.median(),
                p90: t.percentile(0.90),
                p95: t.percentile(0.95),
                p99: t.percentile(0.99),
            },
        };
        Self {
            name: &m.name,
            kind: m.kind.to_string(),
            values,
        }
    }
}

impl From<&ThresholdOutcome> for JsonThreshold {
    fn from(o: &ThresholdOutcome) -> Self {
        Self {
            metric: o.expr.metric.clone(),
            expr: o.expr.to_string(),
            observed: o.observed,
            passed: o.passed,
        }
    }
}

fn mark(ok: bool) -> char {
    if ok { '✓' } else { '✗' }
}

fn fmt_value(v: Option<f64>) -> String {
    match v {
        Some(v) => format!("{v:.2}"),
        None => "n/a".to_string(),
    }
}

fn render_trend(t: &TrendSnapshot) -> String {
    let mut line = format!(
        "avg={} min={} med={} max={}",
        fmt_value(t.mean()),
        fmt_value(t.min()),
        fmt_value(t.median()),
        fmt_value(t.max())
    );
    for (label, p) in TREND_PERCENTILES {
        write!(line, " {label}={}", fmt_value(t.percentile(p))).ok();
    }
    write!(line, " (n={})", t.count()).ok();
    line
}

fn render_text(r: &RunResult) -> String {
    let mut out = String::new();

    let verdict = if r.passed { "passed" } else { "failed" };
    writeln!(
        out,
        "run {verdict} in {}",
        humantime::format_duration(Duration::from_millis(r.elapsed.as_millis() as u64))
    )
    .ok();
    if r.aborted {
        let reason = r.abort_reason.as_deref().unwrap_or("abort requested");
        writeln!(out, "aborted: {reason}").ok();
    }
    out.push('\n');

    out.push_str("scenarios\n");
    for s in &r.scenarios {
        writeln!(
            out,
            "  {} [{}] {}: iterations={} errors={} dropped={} peak_vus={}",
            s.name, s.executor, s.status, s.iterations, s.errors, s.dropped, s.peak_vus
        )
        .ok();
    }
    out.push('\n');

    out.push_str("metrics\n");
    let width = r
        .metrics
        .metrics()
        .iter()
        .map(|m| m.name.len())
        .max()
        .unwrap_or(0)
        + 3;
    for m in r.metrics.metrics() {
        let value = match &m.values {
            MetricValues::Counter { total } => total.to_string(),
            v @ MetricValues::Rate { hits, total } => match v.rate() {
                Some(rate) => format!("{:.2}% {hits}/{total}", rate * 100.0),
                None => "n/a 0/0".to_string(),
            },
            MetricValues::Trend(t) => render_trend(t),
        };
        writeln!(out, "  {:.<width$}: {value}", m.name).ok();
    }

    if !r.checks.is_empty() {
        out.push('\n');
        out.push_str("checks\n");
        for c in &r.checks {
            writeln!(
                out,
                "  {} {}: {} passed, {} failed",
                mark(c.fails == 0),
                c.name,
                c.passes,
                c.fails
            )
            .ok();
        }
    }

    if !r.thresholds.is_empty() {
        out.push('\n');
        out.push_str("thresholds\n");
        for t in &r.thresholds {
            writeln!(
                out,
                "  {} {} {} (observed {})",
                mark(t.passed),
                t.expr.metric,
                t.expr,
                fmt_value(t.observed)
            )
            .ok();
        }
    }

    out
}
