use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::Method;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use surge_metrics::Registry;
use tokio::time::Instant;

use crate::executor::ScenarioEnv;
use crate::metrics::add_millis;
use crate::workload::WorkloadError;

/// What one workload invocation can see and do.
#[derive(Clone)]
pub struct IterationContext {
    env: Arc<ScenarioEnv>,
    vu_id: u64,
    scenario_vu: u64,
    iteration: u64,
}

impl std::fmt::Debug for IterationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterationContext")
            .field("scenario", &self.env.name)
            .field("vu_id", &self.vu_id)
            .field("scenario_vu", &self.scenario_vu)
            .field("iteration", &self.iteration)
            .finish()
    }
}

impl IterationContext {
    pub(crate) fn new(env: Arc<ScenarioEnv>, vu_id: u64, scenario_vu: u64, iteration: u64) -> Self {
        Self {
            env,
            vu_id,
            scenario_vu,
            iteration,
        }
    }

    /// Run-wide worker id, starting at 1.
    pub fn vu_id(&self) -> u64 {
        self.vu_id
    }

    /// Worker id within the scenario, starting at 1.
    pub fn scenario_vu(&self) -> u64 {
        self.scenario_vu
    }

    /// Zero-based invocation index within the scenario. For `shared-iterations` this is the
    /// claimed pool index.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn scenario(&self) -> &str {
        &self.env.name
    }

    /// The scenario was asked to stop; the current invocation should wrap up.
    pub fn is_stopping(&self) -> bool {
        self.env.stop.is_fired()
    }

    pub fn metrics(&self) -> &Arc<Registry> {
        &self.env.registry
    }

    /// Records a named pass/fail check into the `checks` rate. Returns `ok`.
    pub fn check(&self, name: &str, ok: bool) -> bool {
        self.env.builtins.checks.add(ok);
        self.env.checks.record(name, ok);
        if !ok {
            tracing::debug!(
                scenario = %self.env.name,
                vu = self.vu_id,
                check = name,
                "check failed"
            );
        }
        ok
    }

    pub fn http(&self) -> Http<'_> {
        Http { ctx: self }
    }
}

/// Per-check pass/fail counts across the whole run.
#[derive(Debug, Default)]
pub(crate) struct CheckTally {
    counts: Mutex<BTreeMap<String, (u64, u64)>>,
}

impl CheckTally {
    fn record(&self, name: &str, ok: bool) {
        let mut counts = self.counts.lock();
        if !counts.contains_key(name) {
            counts.insert(name.to_string(), (0, 0));
        }
        if let Some(entry) = counts.get_mut(name) {
            if ok {
                entry.0 += 1;
            } else {
                entry.1 += 1;
            }
        }
    }

    /// `(name, passes, fails)` sorted by name.
    pub(crate) fn snapshot(&self) -> Vec<(String, u64, u64)> {
        self.counts
            .lock()
            .iter()
            .map(|(name, (passes, fails))| (name.clone(), *passes, *fails))
            .collect()
    }
}

/// Outcome of one request. Transport failures are reported as status `0` with `error` set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub duration: Duration,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub error: Option<String>,
}

impl HttpResponse {
    fn transport_error(duration: Duration, error: String) -> Self {
        Self {
            status: 0,
            duration,
            headers: Vec::new(),
            body: Bytes::new(),
            error: Some(error),
        }
    }

    /// Counted in `http_req_failed`: no response or a status >= 400.
    pub fn is_failed(&self) -> bool {
        self.status == 0 || self.status >= 400
    }

    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, WorkloadError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Issues requests through the run's transport and records `http_reqs`,
/// `http_req_duration` and `http_req_failed`.
pub struct Http<'a> {
    ctx: &'a IterationContext,
}

impl Http<'_> {
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: impl Into<Bytes>,
        headers: &[(&str, &str)],
    ) -> HttpResponse {
        let mut req = surge_http::HttpRequest::new(method, url).body(body);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }

        let env = &self.ctx.env;
        let started = Instant::now();
        let res = match env.transport.send(req).await {
            Ok(res) => HttpResponse {
                status: res.status,
                duration: res.duration,
                headers: res.headers,
                body: res.body,
                error: None,
            },
            Err(err) => {
                tracing::debug!(scenario = %env.name, url, error = %err, "request failed");
                HttpResponse::transport_error(started.elapsed(), err.to_string())
            }
        };

        env.builtins.http_reqs.add(1);
        add_millis(&env.builtins.http_req_duration, res.duration);
        env.builtins.http_req_failed.add(res.is_failed());
        res
    }

    pub async fn get(&self, url: &str, headers: &[(&str, &str)]) -> HttpResponse {
        self.request(Method::GET, url, Bytes::new(), headers).await
    }

    /// POST `value` as JSON. `Content-Type: application/json` is added to `headers`.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        value: &T,
        headers: &[(&str, &str)],
    ) -> HttpResponse {
        let body = match serde_json::to_vec(value) {
            Ok(body) => body,
            Err(err) => {
                return HttpResponse::transport_error(
                    Duration::ZERO,
                    format!("failed to encode body: {err}"),
                );
            }
        };

        let mut all = Vec::with_capacity(headers.len() + 1);
        all.push(("Content-Type", "application/json"));
        all.extend_from_slice(headers);
        self.request(Method::POST, url, body, &all).await
    }
}
