use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::Request;
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

use super::{Error, HttpRequest, HttpResponse, Result};

#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    pub connect_timeout: Option<Duration>,
    /// Applied to requests that don't carry their own timeout.
    pub request_timeout: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        // The OS-level TCP connect timeout can be tens of seconds, which makes short runs
        // look hung when the target is unreachable.
        Self {
            connect_timeout: Some(Duration::from_secs(3)),
            request_timeout: Some(Duration::from_secs(60)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    request_timeout: Option<Duration>,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(ClientOptions::default())
    }
}

impl HttpClient {
    #[must_use]
    pub fn new(opts: ClientOptions) -> Self {
        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        http_connector.set_connect_timeout(opts.connect_timeout);

        let https_connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let inner = Client::builder(TokioExecutor::new()).build(https_connector);

        Self {
            inner,
            request_timeout: opts.request_timeout,
        }
    }

    pub async fn request(&self, req: HttpRequest) -> Result<HttpResponse> {
        let timeout = req.timeout.or(self.request_timeout);
        let parsed = url::Url::parse(&req.url).map_err(|_| Error::InvalidUrl(req.url.clone()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(Error::UnsupportedScheme(req.url));
        }

        let uri: hyper::Uri = req
            .url
            .parse()
            .map_err(|_| Error::InvalidUrl(req.url.clone()))?;

        let mut builder = Request::builder().method(req.method).uri(uri);
        for (k, v) in req.headers {
            let name = http::header::HeaderName::from_bytes(k.as_bytes())?;
            let value = http::header::HeaderValue::from_str(&v)?;
            builder = builder.header(name, value);
        }
        let req: Request<Full<Bytes>> = builder.body(Full::new(req.body))?;

        let started = Instant::now();
        let exchange = async {
            let res: hyper::Response<Incoming> = self.inner.request(req).await?;
            let (parts, body) = res.into_parts();
            let body = body.collect().await?.to_bytes();
            Ok::<_, Error>((parts, body))
        };

        let (parts, body) = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, exchange).await {
                Ok(res) => res?,
                Err(_) => return Err(Error::Timeout(timeout)),
            },
            None => exchange.await?,
        };
        let duration = started.elapsed();

        // Normalize headers to lowercase keys; repeated headers are joined with ", ".
        let mut merged: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in parts.headers.iter() {
            let key = name.as_str().to_ascii_lowercase();
            let v = String::from_utf8_lossy(value.as_bytes()).to_string();
            merged
                .entry(key)
                .and_modify(|cur| {
                    if !cur.is_empty() {
                        cur.push_str(", ");
                    }
                    cur.push_str(&v);
                })
                .or_insert(v);
        }

        Ok(HttpResponse {
            status: parts.status.as_u16(),
            headers: merged.into_iter().collect(),
            body,
            duration,
        })
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse> {
        self.request(HttpRequest::get(url)).await
    }
}
