use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(10 * 60);
const DEFAULT_TIME_UNIT: Duration = Duration::from_secs(1);

fn default_max_duration() -> Duration {
    DEFAULT_MAX_DURATION
}

fn default_time_unit() -> Duration {
    DEFAULT_TIME_UNIT
}

/// One segment of a piecewise-linear ramp. `target` is a VU count or an arrival rate per
/// `time_unit`, depending on the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Stage {
    #[serde(with = "duration")]
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::EnumString, strum::Display,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ExecutorKind {
    SharedIterations,
    ConstantArrivalRate,
    RampingVus,
    RampingArrivalRate,
}

impl ExecutorKind {
    #[must_use]
    pub fn is_arrival_rate(self) -> bool {
        matches!(self, Self::ConstantArrivalRate | Self::RampingArrivalRate)
    }
}

/// `vus` workers share a pool of `iterations` invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SharedIterationsConfig {
    pub vus: u64,
    pub iterations: u64,
    #[serde(
        default = "default_max_duration",
        with = "duration",
        alias = "maxDuration"
    )]
    pub max_duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConstantArrivalRateConfig {
    pub rate: u64,
    #[serde(default = "default_time_unit", with = "duration", alias = "timeUnit")]
    pub time_unit: Duration,
    #[serde(with = "duration")]
    pub duration: Duration,
    #[serde(alias = "preAllocatedVUs")]
    pub pre_allocated_vus: u64,
    #[serde(default, alias = "maxVUs", skip_serializing_if = "Option::is_none")]
    pub max_vus: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RampingVusConfig {
    #[serde(default, alias = "startVUs")]
    pub start_vus: u64,
    pub stages: Vec<Stage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RampingArrivalRateConfig {
    #[serde(default, alias = "startRate")]
    pub start_rate: u64,
    #[serde(default = "default_time_unit", with = "duration", alias = "timeUnit")]
    pub time_unit: Duration,
    pub stages: Vec<Stage>,
    #[serde(alias = "preAllocatedVUs")]
    pub pre_allocated_vus: u64,
    #[serde(default, alias = "maxVUs", skip_serializing_if = "Option::is_none")]
    pub max_vus: Option<u64>,
}

/// Traffic shape of a scenario, keyed by `executor`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "executor", rename_all = "kebab-case")]
pub enum ExecutorConfig {
    SharedIterations(SharedIterationsConfig),
    ConstantArrivalRate(ConstantArrivalRateConfig),
    RampingVus(RampingVusConfig),
    RampingArrivalRate(RampingArrivalRateConfig),
}

impl ExecutorConfig {
    pub fn shared_iterations(vus: u64, iterations: u64) -> Self {
        Self::SharedIterations(SharedIterationsConfig {
            vus,
            iterations,
            max_duration: DEFAULT_MAX_DURATION,
        })
    }

    pub fn constant_arrival_rate(
        rate: u64,
        duration: Duration,
        pre_allocated_vus: u64,
        max_vus: u64,
    ) -> Self {
        Self::ConstantArrivalRate(ConstantArrivalRateConfig {
            rate,
            time_unit: DEFAULT_TIME_UNIT,
            duration,
            pre_allocated_vus,
            max_vus: Some(max_vus),
        })
    }

    pub fn ramping_vus(start_vus: u64, stages: Vec<Stage>) -> Self {
        Self::RampingVus(RampingVusConfig { start_vus, stages })
    }

    pub fn kind(&self) -> ExecutorKind {
        match self {
            Self::SharedIterations(_) => ExecutorKind::SharedIterations,
            Self::ConstantArrivalRate(_) => ExecutorKind::ConstantArrivalRate,
            Self::RampingVus(_) => ExecutorKind::RampingVus,
            Self::RampingArrivalRate(_) => ExecutorKind::RampingArrivalRate,
        }
    }

    /// Upper bound of the scenario's run time (the deadline for `shared-iterations`).
    pub fn total_duration(&self) -> Duration {
        match self {
            Self::SharedIterations(c) => c.max_duration,
            Self::ConstantArrivalRate(c) => c.duration,
            Self::RampingVus(c) => stages_duration(&c.stages),
            Self::RampingArrivalRate(c) => stages_duration(&c.stages),
        }
    }

    /// Most workers the executor may run at once.
    pub fn max_vus(&self) -> u64 {
        match self {
            Self::SharedIterations(c) => c.vus,
            Self::ConstantArrivalRate(c) => c.max_vus.unwrap_or(c.pre_allocated_vus),
            Self::RampingVus(c) => peak(c.start_vus, &c.stages),
            Self::RampingArrivalRate(c) => c.max_vus.unwrap_or(c.pre_allocated_vus),
        }
    }

    /// Replaces the run length: `max_duration` for `shared-iterations`, `duration` for
    /// `constant-arrival-rate`. Ramping executors keep their stages.
    pub fn override_duration(&mut self, duration: Duration) {
        match self {
            Self::SharedIterations(c) => c.max_duration = duration,
            Self::ConstantArrivalRate(c) => c.duration = duration,
            Self::RampingVus(_) | Self::RampingArrivalRate(_) => {}
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::SharedIterations(c) => {
                if c.vus == 0 {
                    return Err(Error::InvalidVus);
                }
                if c.iterations < c.vus {
                    return Err(Error::InvalidIterations);
                }
                if c.max_duration.is_zero() {
                    return Err(Error::InvalidDuration("max_duration"));
                }
            }
            Self::ConstantArrivalRate(c) => {
                if c.rate == 0 {
                    return Err(Error::InvalidRate);
                }
                if c.duration.is_zero() {
                    return Err(Error::InvalidDuration("duration"));
                }
                validate_arrival_workers(c.time_unit, c.pre_allocated_vus, c.max_vus)?;
            }
            Self::RampingVus(c) => {
                validate_stages(&c.stages)?;
                if peak(c.start_vus, &c.stages) == 0 {
                    return Err(Error::InvalidStages("no stage targets a positive VU count"));
                }
            }
            Self::RampingArrivalRate(c) => {
                validate_stages(&c.stages)?;
                if peak(c.start_rate, &c.stages) == 0 {
                    return Err(Error::InvalidRate);
                }
                validate_arrival_workers(c.time_unit, c.pre_allocated_vus, c.max_vus)?;
            }
        }
        Ok(())
    }
}

fn validate_arrival_workers(time_unit: Duration, pre: u64, max: Option<u64>) -> Result<()> {
    if time_unit.is_zero() {
        return Err(Error::InvalidTimeUnit);
    }
    if pre == 0 {
        return Err(Error::InvalidPreAllocatedVus);
    }
    if max.is_some_and(|max| max < pre) {
        return Err(Error::InvalidMaxVus);
    }
    Ok(())
}

fn validate_stages(stages: &[Stage]) -> Result<()> {
    if stages.is_empty() {
        return Err(Error::InvalidStages("no stages"));
    }
    if stages_duration(stages).is_zero() {
        return Err(Error::InvalidStages("total duration is zero"));
    }
    Ok(())
}

fn stages_duration(stages: &[Stage]) -> Duration {
    stages
        .iter()
        .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration))
}

fn peak(start: u64, stages: &[Stage]) -> u64 {
    stages.iter().map(|s| s.target).fold(start, u64::max)
}

/// Executor settings plus when the scenario starts, relative to the start of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(flatten)]
    pub executor: ExecutorConfig,

    #[serde(default, with = "duration", alias = "startTime")]
    pub start_time: Duration,

    /// Name of the workload to run; resolved by whoever builds the scenarios.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<String>,
}

/// Durations as humantime strings (`"15s"`, `"2m"`) or numeric seconds.
pub mod duration {
    use std::time::Duration;

    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = Duration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(Duration::from_secs(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(Duration::from_secs)
                    .map_err(|_| E::custom("duration must not be negative"))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a non-negative, finite number"));
                }
                Ok(Duration::from_secs_f64(v))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                humantime::parse_duration(v.trim()).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(V)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> std::result::Result<ScenarioConfig, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    #[test]
    fn parses_k6_style_arrival_rate_scenario() {
        let cfg = parse(
            r#"
executor: constant-arrival-rate
startTime: 2m
rate: 1000
timeUnit: 1s
duration: 1m
preAllocatedVUs: 1000
maxVUs: 100000
exec: purchase_item
"#,
        )
        .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(cfg.start_time, Duration::from_secs(120));
        assert_eq!(cfg.exec.as_deref(), Some("purchase_item"));
        assert_eq!(
            cfg.executor,
            ExecutorConfig::ConstantArrivalRate(ConstantArrivalRateConfig {
                rate: 1000,
                time_unit: Duration::from_secs(1),
                duration: Duration::from_secs(60),
                pre_allocated_vus: 1000,
                max_vus: Some(100_000),
            })
        );
        assert_eq!(cfg.executor.max_vus(), 100_000);
        assert!(cfg.executor.validate().is_ok());
    }

    #[test]
    fn shared_iterations_defaults_max_duration() {
        let cfg = parse("executor: shared-iterations\nvus: 1\niterations: 10\n")
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(cfg.executor.total_duration(), DEFAULT_MAX_DURATION);
        assert_eq!(cfg.start_time, Duration::ZERO);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = parse("executor: shared-iterations\nvus: 1\niterations: 1\nduraton: 5s\n");
        assert!(err.is_err());

        let err = parse("executor: constant-vus\nvus: 1\n");
        assert!(err.is_err());
    }

    #[test]
    fn numeric_durations_are_seconds() {
        let stage: Stage =
            serde_yaml::from_str("duration: 15\ntarget: 1000\n").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(stage, Stage::new(Duration::from_secs(15), 1000));
    }

    #[test]
    fn validate_reports_each_bound() {
        let cases = [
            (ExecutorConfig::shared_iterations(0, 1), "vus"),
            (ExecutorConfig::shared_iterations(5, 4), "iterations"),
            (
                ExecutorConfig::constant_arrival_rate(0, Duration::from_secs(1), 1, 1),
                "rate",
            ),
            (
                ExecutorConfig::constant_arrival_rate(1, Duration::ZERO, 1, 1),
                "duration",
            ),
            (
                ExecutorConfig::constant_arrival_rate(1, Duration::from_secs(1), 0, 1),
                "pre_allocated_vus",
            ),
            (
                ExecutorConfig::constant_arrival_rate(1, Duration::from_secs(1), 5, 4),
                "max_vus",
            ),
            (ExecutorConfig::ramping_vus(0, Vec::new()), "stages"),
            (
                ExecutorConfig::ramping_vus(0, vec![Stage::new(Duration::from_secs(1), 0)]),
                "stages",
            ),
        ];

        for (cfg, needle) in cases {
            let err = match cfg.validate() {
                Ok(()) => panic!("expected {needle} error for {cfg:?}"),
                Err(e) => e,
            };
            assert!(err.to_string().contains(needle), "{err} should mention {needle}");
        }
    }

    #[test]
    fn override_duration_only_touches_fixed_shapes() {
        let mut cfg = ExecutorConfig::constant_arrival_rate(10, Duration::from_secs(60), 1, 1);
        cfg.override_duration(Duration::from_secs(5));
        assert_eq!(cfg.total_duration(), Duration::from_secs(5));

        let stages = vec![Stage::new(Duration::from_secs(3), 2)];
        let mut cfg = ExecutorConfig::ramping_vus(0, stages);
        cfg.override_duration(Duration::from_secs(5));
        assert_eq!(cfg.total_duration(), Duration::from_secs(3));
    }

    #[test]
    fn executor_kind_round_trips_through_strings() {
        for kind in [
            ExecutorKind::SharedIterations,
            ExecutorKind::ConstantArrivalRate,
            ExecutorKind::RampingVus,
            ExecutorKind::RampingArrivalRate,
        ] {
            let parsed: ExecutorKind = kind
                .to_string()
                .parse()
                .unwrap_or_else(|e| panic!("{e}"));
            assert_eq!(parsed, kind);
        }
        assert_eq!(ExecutorKind::RampingVus.to_string(), "ramping-vus");
    }
}
