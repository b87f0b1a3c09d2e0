#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use surge_core::{HttpTransport, RunOptions};
use surge_http::{HttpRequest, HttpResponse};

/// Answers every request after `latency` with `status`; requests to a path containing
/// `/fail` get a 500 instead.
pub struct FakeTransport {
    pub latency: Duration,
    pub status: u16,
    pub sent: AtomicU64,
}

impl FakeTransport {
    pub fn new(latency: Duration, status: u16) -> Arc<Self> {
        Arc::new(Self {
            latency,
            status,
            sent: AtomicU64::new(0),
        })
    }
}

#[async_trait::async_trait]
impl HttpTransport for FakeTransport {
    async fn send(&self, req: HttpRequest) -> surge_http::Result<HttpResponse> {
        self.sent.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.latency).await;
        let status = if req.url.contains("/fail") {
            500
        } else {
            self.status
        };
        Ok(HttpResponse {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Bytes::from_static(br#"{"ok":true}"#),
            duration: self.latency,
        })
    }
}

pub fn options_with(transport: Arc<FakeTransport>) -> RunOptions {
    RunOptions {
        transport: Some(transport),
        ..RunOptions::default()
    }
}
