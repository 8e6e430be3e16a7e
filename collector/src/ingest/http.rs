use super::{RawResponse, Transport};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use collector_core::Result;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, instrument};

/// Header TfL's API gateway reads the application key from.
const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

pub struct HttpTransport {
    client: Client,
    app_key: Option<String>,
}

impl HttpTransport {
    pub fn new(app_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("tfl-collector/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, app_key })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str, timeout: Duration) -> RawResponse {
        let mut request = self.client.get(url).timeout(timeout);
        if let Some(key) = &self.app_key {
            request = request.header(SUBSCRIPTION_KEY_HEADER, key);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, timeout = e.is_timeout(), "Request failed before a response");
                return RawResponse::NetworkError(e.to_string());
            }
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| parse_retry_after(v, Utc::now()));
            return RawResponse::RateLimited { retry_after };
        }

        if status.is_client_error() {
            return RawResponse::ClientError {
                status: status.as_u16(),
            };
        }

        if !status.is_success() {
            return RawResponse::ServerError {
                status: status.as_u16(),
            };
        }

        match response.bytes().await {
            Ok(body) => RawResponse::Success(body),
            Err(e) => RawResponse::NetworkError(format!("failed to read body: {e}")),
        }
    }
}

/// Parse a `Retry-After` value given as delta-seconds or an HTTP-date.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    fn spawn_one_shot_http(
        status_line: &'static str,
        extra_headers: &'static str,
        body: &'static str,
    ) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request_buf = [0u8; 2048];
            let read = stream.read(&mut request_buf).unwrap_or(0);
            let response = format!(
                "HTTP/1.1 {status_line}\r\n{extra_headers}\
                 Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).unwrap();
            let _ = stream.flush();
            String::from_utf8_lossy(&request_buf[..read]).into_owned()
        });
        (format!("http://{addr}"), handle)
    }

    #[tokio::test]
    async fn success_returns_body_and_sends_key() {
        let (base, server) = spawn_one_shot_http("200 OK", "", "[{\"id\":\"victoria\"}]");
        let transport = HttpTransport::new(Some("secret".into())).unwrap();

        let response = transport
            .fetch(&format!("{base}/Line/victoria/Status"), Duration::from_secs(5))
            .await;

        assert_eq!(
            response,
            RawResponse::Success(bytes::Bytes::from_static(b"[{\"id\":\"victoria\"}]"))
        );
        let request = server.join().unwrap().to_lowercase();
        assert!(request.starts_with("get /line/victoria/status"));
        assert!(request.contains("ocp-apim-subscription-key: secret"));
    }

    #[tokio::test]
    async fn classifies_rate_limit_with_retry_after() {
        let (base, server) = spawn_one_shot_http("429 Too Many Requests", "Retry-After: 7\r\n", "");
        let transport = HttpTransport::new(None).unwrap();

        let response = transport.fetch(&base, Duration::from_secs(5)).await;

        assert_eq!(
            response,
            RawResponse::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
        );
        server.join().unwrap();
    }

    #[tokio::test]
    async fn classifies_client_and_server_errors() {
        let (base, server) = spawn_one_shot_http("404 Not Found", "", "");
        let transport = HttpTransport::new(None).unwrap();
        assert_eq!(
            transport.fetch(&base, Duration::from_secs(5)).await,
            RawResponse::ClientError { status: 404 }
        );
        server.join().unwrap();

        let (base, server) = spawn_one_shot_http("503 Service Unavailable", "", "");
        assert_eq!(
            transport.fetch(&base, Duration::from_secs(5)).await,
            RawResponse::ServerError { status: 503 }
        );
        server.join().unwrap();
    }

    #[tokio::test]
    async fn unreachable_host_is_a_network_error() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let transport = HttpTransport::new(None).unwrap();

        let response = transport
            .fetch(&format!("http://{addr}"), Duration::from_secs(2))
            .await;

        assert!(matches!(response, RawResponse::NetworkError(_)));
    }

    #[test]
    fn parses_retry_after_forms() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 27, 30).unwrap();
        assert_eq!(parse_retry_after(" 12 ", now), Some(Duration::from_secs(12)));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", now),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:00:00 GMT", now),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon", now), None);
    }
}
