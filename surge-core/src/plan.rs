use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ScenarioConfig;
use crate::coordinator::ErrorCeiling;
use crate::error::{Error, Result};
use crate::thresholds::ThresholdExpr;

/// A test plan file: named scenarios plus thresholds keyed by metric.
///
/// ```yaml
/// scenarios:
///   buy:
///     executor: constant-arrival-rate
///     rate: 100
///     duration: 30s
///     preAllocatedVUs: 10
///     exec: purchase_item
/// thresholds:
///   http_req_duration: ["p(95)<50"]
///   http_req_failed: "rate<0.0001"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestPlan {
    pub scenarios: BTreeMap<String, ScenarioConfig>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub thresholds: BTreeMap<String, ThresholdList>,

    #[serde(default, skip_serializing_if = "Option::is_none", alias = "errorCeiling")]
    pub error_ceiling: Option<ErrorCeiling>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdList {
    One(String),
    Many(Vec<String>),
}

impl ThresholdList {
    pub fn as_slice(&self) -> &[String] {
        match self {
            Self::One(s) => std::slice::from_ref(s),
            Self::Many(v) => v,
        }
    }
}

impl TestPlan {
    /// Parses YAML; JSON documents are accepted too.
    pub fn from_yaml_str(source: &str) -> Result<Self> {
        let plan: Self =
            serde_yaml::from_str(source).map_err(|e| Error::InvalidPlan(e.to_string()))?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn from_json_str(source: &str) -> Result<Self> {
        let plan: Self =
            serde_json::from_str(source).map_err(|e| Error::InvalidPlan(e.to_string()))?;
        plan.validate()?;
        Ok(plan)
    }

    /// Reads a `.json` file as JSON and anything else as YAML.
    pub fn from_path(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidPlan(format!("failed to read {}: {e}", path.display())))?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let parsed = if is_json {
            Self::from_json_str(&source)
        } else {
            Self::from_yaml_str(&source)
        };
        parsed.map_err(|e| match e {
            Error::InvalidPlan(msg) => Error::InvalidPlan(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    /// Executor bounds and threshold syntax. Metric names are checked later against the
    /// registry the run uses.
    pub fn validate(&self) -> Result<()> {
        if self.scenarios.is_empty() {
            return Err(Error::NoScenarios);
        }
        for (name, scenario) in &self.scenarios {
            if name.trim().is_empty() {
                return Err(Error::InvalidScenarioName);
            }
            scenario.executor.validate()?;
        }
        self.thresholds().map(|_| ())
    }

    pub fn thresholds(&self) -> Result<Vec<ThresholdExpr>> {
        self.thresholds
            .iter()
            .flat_map(|(metric, list)| {
                list.as_slice()
                    .iter()
                    .map(move |source| ThresholdExpr::parse(metric.as_str(), source))
            })
            .collect()
    }

    /// Applies `duration` to every scenario that has a single run length.
    pub fn override_duration(&mut self, duration: Duration) {
        for scenario in self.scenarios.values_mut() {
            scenario.executor.override_duration(duration);
        }
    }
}
