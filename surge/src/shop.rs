//! Built-in workloads against the merch-shop API (`/api/auth`, `/api/info`, `/api/buy/{item}`,
//! `/api/sendCoin`).

use std::sync::Arc;
use std::time::Duration;

use rand::Rng as _;
use serde::Deserialize;
use surge_core::{
    CounterHandle, HttpResponse, IterationContext, MetricKind, RateHandle, Registry, TrendHandle,
    Workload, WorkloadError, WorkloadFuture,
};

pub(crate) const DEFAULT_PASSWORD: &str = "testpass";

/// Items sold by the shop.
pub(crate) const CATALOGUE: &[&str] = &[
    "t-shirt",
    "cup",
    "book",
    "pen",
    "powerbank",
    "hoody",
    "umbrella",
    "socks",
    "wallet",
    "pink-hoody",
];

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum BuiltinWorkload {
    Auth,
    ShopFlow,
    CreateUser,
    PurchaseItem,
    SendCoins,
    GetInfo,
}

impl BuiltinWorkload {
    pub(crate) fn describe(self) -> &'static str {
        match self {
            Self::Auth => "POST /api/auth as user<vu>; records auth_* metrics",
            Self::ShopFlow => {
                "auth as user<vu>, GET /api/info, GET /api/buy/t-shirt; records auth_*, info_* and buy_* metrics"
            }
            Self::CreateUser => "POST /api/auth as user<iteration>",
            Self::PurchaseItem => "auth as a random user in 0..=9999, buy a random catalogue item",
            Self::SendCoins => {
                "auth as a random user in 0..=49999, send 1..=100 coins to a user in 50000..=99999"
            }
            Self::GetInfo => "auth as a random user in 0..=99999, GET /api/info",
        }
    }
}

/// Counter, success rate and response-time trend for one endpoint.
#[derive(Debug, Clone)]
pub(crate) struct EndpointMetrics {
    requests: CounterHandle,
    success: RateHandle,
    response_time: TrendHandle,
}

impl EndpointMetrics {
    fn register(registry: &Registry, prefix: &str) -> surge_core::Result<Self> {
        let requests = format!("{prefix}_requests");
        let success = format!("{prefix}_success_rate");
        let response_time = format!("{prefix}_response_time");
        registry.register(&requests, MetricKind::Counter)?;
        registry.register(&success, MetricKind::Rate)?;
        registry.register(&response_time, MetricKind::Trend)?;

        Ok(Self {
            requests: registry.counter(&requests)?,
            success: registry.rate(&success)?,
            response_time: registry.trend(&response_time)?,
        })
    }

    fn record(&self, res: &HttpResponse) {
        self.requests.add(1);
        self.success.add(res.status == 200);
        if let Err(err) = self
            .response_time
            .add(res.duration.as_secs_f64() * 1000.0)
        {
            tracing::debug!(error = %err, "response time not recorded");
        }
    }
}

/// Per-endpoint metrics, registered before thresholds are attached so plans can refer to them.
#[derive(Debug, Clone)]
pub(crate) struct ShopMetrics {
    auth: EndpointMetrics,
    info: EndpointMetrics,
    buy: EndpointMetrics,
    send_coin: EndpointMetrics,
}

impl ShopMetrics {
    pub(crate) fn register(registry: &Registry) -> surge_core::Result<Self> {
        Ok(Self {
            auth: EndpointMetrics::register(registry, "auth")?,
            info: EndpointMetrics::register(registry, "info")?,
            buy: EndpointMetrics::register(registry, "buy")?,
            send_coin: EndpointMetrics::register(registry, "send_coin")?,
        })
    }
}

#[derive(Debug)]
struct ShopApi {
    auth: String,
    info: String,
    send_coin: String,
    base_url: String,
    password: String,
}

impl ShopApi {
    fn new(base_url: &str, password: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            auth: format!("{base_url}/api/auth"),
            info: format!("{base_url}/api/info"),
            send_coin: format!("{base_url}/api/sendCoin"),
            base_url,
            password: password.to_string(),
        }
    }

    fn buy(&self, item: &str) -> String {
        format!("{}/api/buy/{item}", self.base_url)
    }
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
}

#[derive(Debug)]
struct Inner {
    kind: BuiltinWorkload,
    api: ShopApi,
    metrics: ShopMetrics,
    think_time: Option<Duration>,
}

/// One built-in workload bound to a target service.
#[derive(Debug, Clone)]
pub(crate) struct ShopWorkload {
    inner: Arc<Inner>,
}

impl ShopWorkload {
    pub(crate) fn new(
        kind: BuiltinWorkload,
        base_url: &str,
        metrics: ShopMetrics,
        think_time: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                kind,
                api: ShopApi::new(base_url, DEFAULT_PASSWORD),
                metrics,
                think_time,
            }),
        }
    }
}

impl Workload for ShopWorkload {
    fn call(&self, ctx: IterationContext) -> WorkloadFuture {
        let inner = self.inner.clone();
        Box::pin(async move {
            let res = inner.invoke(&ctx).await;
            if let Some(pause) = inner.think_time
                && !ctx.is_stopping()
            {
                tokio::time::sleep(pause).await;
            }
            res
        })
    }
}

impl Inner {
    async fn invoke(&self, ctx: &IterationContext) -> Result<(), WorkloadError> {
        match self.kind {
            BuiltinWorkload::Auth => {
                let res = self.login(ctx, &format!("user{}", ctx.vu_id())).await;
                ctx.check("status is 200", res.status == 200);
                Ok(())
            }
            BuiltinWorkload::ShopFlow => self.shop_flow(ctx).await,
            BuiltinWorkload::CreateUser => {
                let res = self.login(ctx, &format!("user{}", ctx.iteration())).await;
                ctx.check("auth status is 200", res.status == 200);
                Ok(())
            }
            BuiltinWorkload::PurchaseItem => {
                let (user, item) = {
                    let mut rng = rand::rng();
                    let user = rng.random_range(0..=9_999u32);
                    let item = CATALOGUE[rng.random_range(0..CATALOGUE.len())];
                    (user, item)
                };
                let token = self.token(ctx, &format!("user{user}")).await?;
                let auth = bearer(&token);
                let res = ctx.http().get(&self.api.buy(item), &[auth.as_header()]).await;
                self.metrics.buy.record(&res);
                ctx.check("buy status is 200", res.status == 200);
                Ok(())
            }
            BuiltinWorkload::SendCoins => {
                let (from, to, amount) = {
                    let mut rng = rand::rng();
                    (
                        rng.random_range(0..=49_999u32),
                        rng.random_range(50_000..=99_999u32),
                        rng.random_range(1..=100i64),
                    )
                };
                let token = self.token(ctx, &format!("user{from}")).await?;
                let auth = bearer(&token);
                let body = serde_json::json!({ "toUser": format!("user{to}"), "amount": amount });
                let res = ctx
                    .http()
                    .post_json(&self.api.send_coin, &body, &[auth.as_header()])
                    .await;
                self.metrics.send_coin.record(&res);
                ctx.check("sendCoin status is 200", res.status == 200);
                Ok(())
            }
            BuiltinWorkload::GetInfo => {
                let user = rand::rng().random_range(0..=99_999u32);
                let token = self.token(ctx, &format!("user{user}")).await?;
                let auth = bearer(&token);
                let res = ctx.http().get(&self.api.info, &[auth.as_header()]).await;
                self.metrics.info.record(&res);
                ctx.check("userInfo status is 200", res.status == 200);
                Ok(())
            }
        }
    }

    async fn shop_flow(&self, ctx: &IterationContext) -> Result<(), WorkloadError> {
        let res = self.login(ctx, &format!("user{}", ctx.vu_id())).await;
        ctx.check("status is 200", res.status == 200);
        let token = parse_token(&res)?;
        let auth = bearer(&token);

        let res = ctx.http().get(&self.api.info, &[auth.as_header()]).await;
        ctx.check("status is 200", res.status == 200);
        self.metrics.info.record(&res);
        log_error("/api/info", &res);

        let res = ctx
            .http()
            .get(&self.api.buy("t-shirt"), &[auth.as_header()])
            .await;
        ctx.check("status is 200", res.status == 200);
        self.metrics.buy.record(&res);
        log_error("/api/buy/{item}", &res);
        Ok(())
    }

    /// POST `/api/auth`, recording the `auth_*` metrics.
    async fn login(&self, ctx: &IterationContext, username: &str) -> HttpResponse {
        let body = serde_json::json!({ "username": username, "password": self.api.password });
        let res = ctx.http().post_json(&self.api.auth, &body, &[]).await;
        self.metrics.auth.record(&res);
        log_error("/api/auth", &res);
        res
    }

    async fn token(&self, ctx: &IterationContext, username: &str) -> Result<String, WorkloadError> {
        let res = self.login(ctx, username).await;
        ctx.check("auth status is 200", res.status == 200);
        parse_token(&res)
    }
}

fn parse_token(res: &HttpResponse) -> Result<String, WorkloadError> {
    if let Some(err) = &res.error {
        return Err(WorkloadError::failed(format!("auth request failed: {err}")));
    }
    if res.status != 200 {
        return Err(WorkloadError::failed(format!(
            "auth returned status {}",
            res.status
        )));
    }
    Ok(res.json::<AuthResponse>()?.token)
}

fn log_error(endpoint: &str, res: &HttpResponse) {
    if res.status != 200 {
        tracing::warn!(
            endpoint,
            status = res.status,
            body = res.text().unwrap_or("<binary>"),
            error = res.error.as_deref(),
            "unexpected response"
        );
    }
}

struct Bearer(String);

impl Bearer {
    fn as_header(&self) -> (&str, &str) {
        ("Authorization", self.0.as_str())
    }
}

fn bearer(token: &str) -> Bearer {
    Bearer(format!("Bearer {token}"))
}
