//! Transport capability and its HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;

/// Default request timeout (20 seconds), applied to connect and to the whole
/// request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Transport-level failures. All of them are retryable.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Timeout elapsed.
    #[error("request timed out")]
    Timeout,

    /// Any other request failure (body, protocol, redirect...).
    #[error("request failed: {0}")]
    Request(String),

    /// HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

/// Sends one payload and reports the response status.
///
/// A returned status code means a response arrived; classifying it is the
/// caller's job.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// POST `body` to `url` as `application/json`.
    async fn post(&self, url: &str, body: &[u8]) -> Result<u16, TransportError>;
}

/// reqwest-backed [`Transport`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Build a transport whose connect and total timeouts are both `timeout`.
    ///
    /// # Errors
    /// Returns `TransportError::Client` if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self { client, timeout })
    }

    /// Configured request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, url: &str, body: &[u8]) -> Result<u16, TransportError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .await?;

        Ok(response.status().as_u16())
    }
}
