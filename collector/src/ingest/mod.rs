pub mod http;

use async_trait::async_trait;
use bytes::Bytes;
use collector_core::backoff::ResponseClass;
use std::time::Duration;

/// Outcome of a single GET against the upstream API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawResponse {
    Success(Bytes),
    RateLimited { retry_after: Option<Duration> },
    ClientError { status: u16 },
    ServerError { status: u16 },
    NetworkError(String),
}

impl RawResponse {
    pub fn class(&self) -> ResponseClass {
        match self {
            RawResponse::Success(_) => ResponseClass::Success,
            RawResponse::RateLimited { retry_after } => ResponseClass::RateLimited {
                retry_after: *retry_after,
            },
            RawResponse::ClientError { status } => ResponseClass::ClientError { status: *status },
            RawResponse::ServerError { status } => ResponseClass::ServerError { status: *status },
            RawResponse::NetworkError(_) => ResponseClass::NetworkError,
        }
    }

    pub fn into_result(self) -> Result<Bytes, ResponseClass> {
        match self {
            RawResponse::Success(body) => Ok(body),
            other => Err(other.class()),
        }
    }
}

/// Stateless transport. Retries are the caller's job.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> RawResponse;
}

/// Upstream endpoints the collector reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `GET /Line/Mode/{modes}`
    LinesByMode(String),
    /// `GET /Line/{ids}/Status`
    LineStatus(String),
    /// `GET /Line/{ids}/Arrivals`
    LineArrivals(String),
}

impl Endpoint {
    pub fn path(&self) -> String {
        match self {
            Endpoint::LinesByMode(modes) => format!("/Line/Mode/{modes}"),
            Endpoint::LineStatus(ids) => format!("/Line/{ids}/Status"),
            Endpoint::LineArrivals(ids) => format!("/Line/{ids}/Arrivals"),
        }
    }

    pub fn url(&self, base_url: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), self.path())
    }
}

pub use http::HttpTransport;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_urls_without_double_slashes() {
        let endpoint = Endpoint::LineStatus("victoria,central".into());
        assert_eq!(
            endpoint.url("https://api.tfl.gov.uk/"),
            "https://api.tfl.gov.uk/Line/victoria,central/Status"
        );
        assert_eq!(
            Endpoint::LinesByMode("tube,dlr".into()).path(),
            "/Line/Mode/tube,dlr"
        );
    }

    #[test]
    fn only_success_carries_a_body() {
        let ok = RawResponse::Success(Bytes::from_static(b"[]"));
        assert_eq!(ok.into_result(), Ok(Bytes::from_static(b"[]")));

        let limited = RawResponse::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(
            limited.into_result(),
            Err(ResponseClass::RateLimited {
                retry_after: Some(Duration::from_secs(3))
            })
        );
    }
}
