use surge_http::{HttpClient, HttpRequest, HttpResponse};

/// Sends one HTTP request. The engine treats it as a black box: it only times the call and
/// classifies the outcome.
#[async_trait::async_trait]
pub trait HttpTransport: Send + Sync + 'static {
    async fn send(&self, req: HttpRequest) -> surge_http::Result<HttpResponse>;
}

#[async_trait::async_trait]
impl HttpTransport for HttpClient {
    async fn send(&self, req: HttpRequest) -> surge_http::Result<HttpResponse> {
        self.request(req).await
    }
}
