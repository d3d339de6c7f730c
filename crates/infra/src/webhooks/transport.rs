use std::sync::Mutex;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Could not build or send the request (DNS, connect, timeout, bad header).
    #[error("webhook request failed: {0}")]
    Request(String),

    /// Destination answered with a non-2xx status.
    #[error("webhook destination returned status {0}")]
    Status(u16),
}

/// One POST to a callback URL.
///
/// `headers` are applied in order; a later header replaces an earlier one of
/// the same name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl WebhookRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub trait WebhookTransport: Send + Sync {
    /// Returns the response status on 2xx.
    fn deliver(&self, request: &WebhookRequest) -> Result<u16, TransportError>;
}

/// Blocking reqwest transport.
#[derive(Debug, Clone)]
pub struct HttpWebhookTransport {
    client: Client,
}

impl HttpWebhookTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self { client })
    }
}

impl WebhookTransport for HttpWebhookTransport {
    fn deliver(&self, request: &WebhookRequest) -> Result<u16, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Request(format!("invalid header name {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Request(format!("invalid header value for {name}: {e}")))?;
            headers.insert(name, value);
        }

        let resp = self
            .client
            .post(&request.url)
            .headers(headers)
            .body(request.body.clone())
            .send()
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(TransportError::Status(status.as_u16()))
        }
    }
}

/// Test double: records every request, fails for configured URLs.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    requests: Mutex<Vec<WebhookRequest>>,
    unreachable: Mutex<Vec<String>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliveries to `url` fail as if the host were down.
    pub fn unreachable(self, url: impl Into<String>) -> Self {
        if let Ok(mut u) = self.unreachable.lock() {
            u.push(url.into());
        }
        self
    }

    pub fn requests(&self) -> Vec<WebhookRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn requests_to(&self, url: &str) -> Vec<WebhookRequest> {
        self.requests().into_iter().filter(|r| r.url == url).collect()
    }
}

impl WebhookTransport for RecordingTransport {
    fn deliver(&self, request: &WebhookRequest) -> Result<u16, TransportError> {
        let down = self
            .unreachable
            .lock()
            .map(|u| u.iter().any(|x| x == &request.url))
            .unwrap_or(false);
        if down {
            return Err(TransportError::Request(format!("connection refused: {}", request.url)));
        }
        if let Ok(mut r) = self.requests.lock() {
            r.push(request.clone());
        }
        Ok(200)
    }
}
