use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    InvalidUrl,
    UnsupportedScheme,
    RequestBuild,
    HeaderName,
    HeaderValue,
    Request,
    Timeout,
    BodyRead,
    Json,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("only http:// and https:// URLs are supported: {0}")]
    UnsupportedScheme(String),

    #[error("http request build failed: {0}")]
    RequestBuild(#[from] http::Error),

    #[error("invalid http header name: {0}")]
    HeaderName(#[from] http::header::InvalidHeaderName),

    #[error("invalid http header value: {0}")]
    HeaderValue(#[from] http::header::InvalidHeaderValue),

    #[error("http request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    #[error("http request timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to read response body: {0}")]
    BodyRead(#[from] hyper::Error),

    #[error("json body: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidUrl(_) => ErrorKind::InvalidUrl,
            Self::UnsupportedScheme(_) => ErrorKind::UnsupportedScheme,
            Self::RequestBuild(_) => ErrorKind::RequestBuild,
            Self::HeaderName(_) => ErrorKind::HeaderName,
            Self::HeaderValue(_) => ErrorKind::HeaderValue,
            Self::Request(_) => ErrorKind::Request,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::BodyRead(_) => ErrorKind::BodyRead,
            Self::Json(_) => ErrorKind::Json,
        }
    }
}
