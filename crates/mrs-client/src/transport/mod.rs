//! Minimal HTTP seam
//!
//! The resolver and client only ever issue a single JSON request and read a
//! status, headers and an optional JSON body back. Connection pooling, TLS and
//! redirects belong to the implementation behind [`Transport`].

pub mod http;
pub mod mock;

pub use http::HttpTransport;
pub use mock::{MockFault, MockNetwork, MockServer};

use async_trait::async_trait;
use mrs_core::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// HTTP methods used by the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound request
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub json: Option<Value>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: BTreeMap::new(),
            json: None,
        }
    }

    pub fn post(url: impl Into<String>, json: Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: BTreeMap::new(),
            json: Some(json),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Response to an [`HttpRequest`]
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    /// Raw body text
    pub body: String,
    /// Parsed body, when it is JSON
    pub json: Option<Value>,
    pub elapsed: Duration,
}

impl HttpResponse {
    /// Build a response, parsing the body as JSON when possible
    pub fn new(
        status: u16,
        headers: BTreeMap<String, String>,
        body: String,
        elapsed: Duration,
    ) -> Self {
        let json = serde_json::from_str(&body).ok();
        Self {
            status,
            headers,
            body,
            json,
            elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Server-provided error message, falling back to the body or status
    pub fn message(&self) -> String {
        match &self.json {
            Some(json) => json
                .get("message")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| json.to_string()),
            None if !self.body.trim().is_empty() => self.body.trim().to_string(),
            None => format!("HTTP {}", self.status),
        }
    }
}

fn find_header<'a>(headers: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Performs a single HTTP request
///
/// Network failures and timeouts are returned as `MrsError::Connection`;
/// any HTTP status, including errors, is a successful response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// Human-readable name for logs
    fn description(&self) -> &str;
}

impl std::fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Transport({})", self.description())
    }
}
