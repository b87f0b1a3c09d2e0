use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tokio::time::{Duration, sleep};

pub const PATH_AUTH: &str = "/api/auth";
pub const PATH_INFO: &str = "/api/info";
pub const PATH_BUY: &str = "/api/buy/{item}";
pub const PATH_SEND_COIN: &str = "/api/sendCoin";
pub const PATH_SLOW: &str = "/slow";

pub const STARTING_COINS: i64 = 1000;

/// Merch catalogue with prices in coins.
pub const CATALOGUE: &[(&str, i64)] = &[
    ("t-shirt", 80),
    ("cup", 20),
    ("book", 50),
    ("pen", 10),
    ("powerbank", 200),
    ("hoody", 300),
    ("umbrella", 200),
    ("socks", 10),
    ("wallet", 50),
    ("pink-hoody", 500),
];

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    auth_total: Arc<AtomicU64>,
    purchases: Arc<AtomicU64>,
    transfers: Arc<AtomicU64>,
    rejected: Arc<AtomicU64>,
}

impl TestServerStats {
    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn auth_total(&self) -> u64 {
        self.auth_total.load(Ordering::Relaxed)
    }

    pub fn purchases(&self) -> u64 {
        self.purchases.load(Ordering::Relaxed)
    }

    pub fn transfers(&self) -> u64 {
        self.transfers.load(Ordering::Relaxed)
    }

    /// Requests answered with a 4xx status.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct Account {
    password: String,
    coins: i64,
    inventory: BTreeMap<String, u64>,
    received: Vec<Received>,
    sent: Vec<Sent>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Received {
    from_user: String,
    amount: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Sent {
    to_user: String,
    amount: i64,
}

#[derive(Debug, Clone, Default)]
pub struct Shop {
    stats: TestServerStats,
    accounts: Arc<Mutex<HashMap<String, Account>>>,
}

impl Shop {
    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn coins(&self, username: &str) -> Option<i64> {
        self.accounts.lock().await.get(username).map(|a| a.coins)
    }

    pub async fn users(&self) -> usize {
        self.accounts.lock().await.len()
    }
}

#[derive(Debug, Clone)]
pub struct TestServerUrls {
    pub base_url: String,
    pub auth: String,
    pub info: String,
    pub send_coin: String,
    pub slow: String,
}

impl TestServerUrls {
    pub fn new(base_url: String) -> Self {
        Self {
            auth: format!("{base_url}{PATH_AUTH}"),
            info: format!("{base_url}{PATH_INFO}"),
            send_coin: format!("{base_url}{PATH_SEND_COIN}"),
            slow: format!("{base_url}{PATH_SLOW}"),
            base_url,
        }
    }

    pub fn buy(&self, item: &str) -> String {
        format!("{}/api/buy/{item}", self.base_url)
    }
}

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "errors": self.1 }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn reject(shop: &Shop, status: StatusCode, msg: impl Into<String>) -> ApiError {
    TestServerStats::inc(&shop.stats.rejected);
    ApiError(status, msg.into())
}

fn token_for(username: &str) -> String {
    format!("tok.{username}")
}

fn bearer_user(shop: &Shop, headers: &HeaderMap) -> ApiResult<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .and_then(|t| t.strip_prefix("tok."))
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .ok_or_else(|| reject(shop, StatusCode::UNAUTHORIZED, "Unauthorized"))
}

#[derive(Debug, Deserialize)]
struct AuthRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

/// Logs the user in, creating the account with the starting balance on first sight.
async fn handle_auth(State(shop): State<Shop>, body: axum::body::Bytes) -> ApiResult<Response> {
    TestServerStats::inc(&shop.stats.requests_total);
    TestServerStats::inc(&shop.stats.auth_total);

    let req: AuthRequest = serde_json::from_slice(&body)
        .map_err(|_| reject(&shop, StatusCode::BAD_REQUEST, "Invalid request"))?;
    if req.username.trim().is_empty() || req.password.trim().is_empty() {
        return Err(reject(
            &shop,
            StatusCode::BAD_REQUEST,
            "Username and password are required",
        ));
    }

    let mut accounts = shop.accounts.lock().await;
    let account = accounts
        .entry(req.username.clone())
        .or_insert_with(|| Account {
            password: req.password.clone(),
            coins: STARTING_COINS,
            ..Account::default()
        });
    if account.password != req.password {
        drop(accounts);
        return Err(reject(&shop, StatusCode::UNAUTHORIZED, "Unauthorized"));
    }

    Ok(Json(serde_json::json!({ "token": token_for(&req.username) })).into_response())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InfoResponse {
    coins: i64,
    inventory: Vec<InventoryItem>,
    coin_history: CoinHistory,
}

#[derive(Debug, Serialize)]
struct InventoryItem {
    #[serde(rename = "type")]
    kind: String,
    quantity: u64,
}

#[derive(Debug, Serialize)]
struct CoinHistory {
    received: Vec<Received>,
    sent: Vec<Sent>,
}

async fn handle_info(State(shop): State<Shop>, headers: HeaderMap) -> ApiResult<Response> {
    TestServerStats::inc(&shop.stats.requests_total);
    let user = bearer_user(&shop, &headers)?;

    let accounts = shop.accounts.lock().await;
    let Some(account) = accounts.get(&user) else {
        drop(accounts);
        return Err(reject(&shop, StatusCode::UNAUTHORIZED, "Unauthorized"));
    };

    let info = InfoResponse {
        coins: account.coins,
        inventory: account
            .inventory
            .iter()
            .map(|(kind, quantity)| InventoryItem {
                kind: kind.clone(),
                quantity: *quantity,
            })
            .collect(),
        coin_history: CoinHistory {
            received: account.received.clone(),
            sent: account.sent.clone(),
        },
    };
    Ok(Json(info).into_response())
}

async fn handle_buy(
    State(shop): State<Shop>,
    Path(item): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    TestServerStats::inc(&shop.stats.requests_total);
    let user = bearer_user(&shop, &headers)?;

    let Some(&(_, price)) = CATALOGUE.iter().find(|(name, _)| *name == item) else {
        return Err(reject(&shop, StatusCode::BAD_REQUEST, "item not found"));
    };

    let mut accounts = shop.accounts.lock().await;
    let outcome = match accounts.get_mut(&user) {
        None => Err((StatusCode::UNAUTHORIZED, "Unauthorized")),
        Some(a) if a.coins < price => Err((StatusCode::BAD_REQUEST, "insufficient coins")),
        Some(a) => {
            a.coins -= price;
            *a.inventory.entry(item).or_insert(0) += 1;
            Ok(())
        }
    };
    drop(accounts);

    match outcome {
        Ok(()) => {
            TestServerStats::inc(&shop.stats.purchases);
            let body = serde_json::json!({ "message": "Item purchased successfully" });
            Ok(Json(body).into_response())
        }
        Err((status, msg)) => Err(reject(&shop, status, msg)),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendCoinRequest {
    #[serde(default)]
    to_user: String,
    #[serde(default)]
    amount: i64,
}

async fn handle_send_coin(
    State(shop): State<Shop>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult<Response> {
    TestServerStats::inc(&shop.stats.requests_total);
    let from = bearer_user(&shop, &headers)?;

    let req: SendCoinRequest = serde_json::from_slice(&body)
        .map_err(|_| reject(&shop, StatusCode::BAD_REQUEST, "invalid request body"))?;
    if req.amount <= 0 {
        return Err(reject(
            &shop,
            StatusCode::BAD_REQUEST,
            "Amount is required and must be positive",
        ));
    }
    if req.to_user.is_empty() {
        return Err(reject(&shop, StatusCode::BAD_REQUEST, "toUser is required"));
    }
    if req.to_user == from {
        return Err(reject(
            &shop,
            StatusCode::BAD_REQUEST,
            format!("wrong coins recipient: {from}"),
        ));
    }

    let mut accounts = shop.accounts.lock().await;
    let outcome = match (accounts.get(&from), accounts.get(&req.to_user)) {
        (None, _) => Err((StatusCode::UNAUTHORIZED, "Unauthorized".to_string())),
        (_, None) => Err((
            StatusCode::BAD_REQUEST,
            format!("recipient not found: {}", req.to_user),
        )),
        (Some(a), _) if a.coins < req.amount => {
            Err((StatusCode::BAD_REQUEST, "insufficient coins".to_string()))
        }
        _ => Ok(()),
    };
    if outcome.is_ok() {
        if let Some(sender) = accounts.get_mut(&from) {
            sender.coins -= req.amount;
            sender.sent.push(Sent {
                to_user: req.to_user.clone(),
                amount: req.amount,
            });
        }
        if let Some(receiver) = accounts.get_mut(&req.to_user) {
            receiver.coins += req.amount;
            receiver.received.push(Received {
                from_user: from.clone(),
                amount: req.amount,
            });
        }
    }
    drop(accounts);

    match outcome {
        Ok(()) => {
            TestServerStats::inc(&shop.stats.transfers);
            Ok(Json(serde_json::json!({ "message": "Coins transferred successfully" }))
                .into_response())
        }
        Err((status, msg)) => Err(reject(&shop, status, msg)),
    }
}

async fn handle_slow(State(shop): State<Shop>) -> &'static str {
    TestServerStats::inc(&shop.stats.requests_total);
    sleep(Duration::from_millis(50)).await;
    "slow"
}

pub fn router(shop: Shop) -> Router {
    Router::new()
        .route(PATH_AUTH, post(handle_auth))
        .route(PATH_INFO, get(handle_info))
        .route(PATH_BUY, get(handle_buy))
        .route(PATH_SEND_COIN, post(handle_send_coin))
        .route(PATH_SLOW, get(handle_slow))
        .with_state(shop)
}

pub struct TestServer {
    addr: SocketAddr,
    urls: TestServerUrls,
    shop: Shop,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let shop = Shop::default();
        let app = router(shop.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            urls: TestServerUrls::new(format!("http://{addr}")),
            shop,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.urls.base_url
    }

    pub fn urls(&self) -> &TestServerUrls {
        &self.urls
    }

    pub fn shop(&self) -> &Shop {
        &self.shop
    }

    pub fn stats(&self) -> &TestServerStats {
        self.shop.stats()
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
