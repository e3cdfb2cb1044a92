//! `reqwest`-backed transport

use async_trait::async_trait;
use mrs_core::{MrsError, Result};
use reqwest::redirect::Policy;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{HttpRequest, HttpResponse, Method, Transport};

const MAX_REDIRECTS: usize = 5;

/// HTTPS transport with a per-request timeout
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .user_agent(format!("mrs-client/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MrsError::connection("-", format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse> {
        let started = Instant::now();
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(json) = &request.json {
            builder = builder.json(json);
        }

        debug!(method = %request.method, url = %request.url, "Sending request");

        let response = builder.send().await.map_err(|e| {
            let message = if e.is_timeout() {
                format!("Request timed out after {:?}", self.timeout)
            } else {
                e.to_string()
            };
            MrsError::connection(&request.url, message)
        })?;

        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| MrsError::connection(&request.url, e.to_string()).with_status(status))?;

        let elapsed = started.elapsed();
        debug!(
            url = %request.url,
            status = status,
            elapsed_ms = elapsed.as_millis() as u64,
            "Received response"
        );

        Ok(HttpResponse::new(status, headers, body, elapsed))
    }

    fn description(&self) -> &str {
        "https"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_creation() {
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        assert_eq!(transport.timeout(), Duration::from_secs(5));
        assert_eq!(transport.description(), "https");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_connection_error() {
        let transport = HttpTransport::new(Duration::from_millis(500)).unwrap();
        let err = transport
            .request(HttpRequest::get("http://127.0.0.1:1/.well-known/mrs"))
            .await
            .unwrap_err();
        assert!(err.is_connection());
    }
}
