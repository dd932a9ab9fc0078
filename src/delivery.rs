//! Delivery Layer
//!
//! Ships encoded samples to the remote collector with bounded retries.
//!
//! # Architecture
//!
//! - [`Transport`]: capability that POSTs bytes and reports the status code
//! - [`HttpTransport`]: reqwest-backed transport with connect/total timeouts
//! - [`DeliveryClient`]: one bounded-retry delivery sequence per envelope
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use beacon::delivery::{DeliveryClient, HttpTransport, RetryPolicy};
//! use beacon::{Sample, encode};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(HttpTransport::new(std::time::Duration::from_secs(20))?);
//! let client = DeliveryClient::new(transport, "https://collector.example.com/ingest")
//!     .with_policy(RetryPolicy::default());
//!
//! let envelope = encode(&Sample::new(0.8, chrono::Utc::now()))?;
//! let outcome = client.deliver(&envelope).await;
//! println!("{outcome}");
//! # Ok(())
//! # }
//! ```

mod client;
mod transport;

pub use client::{
    AttemptError, DEFAULT_BACKOFF, DEFAULT_MAX_ATTEMPTS, DeliveryClient, DeliveryOutcome,
    RetryPolicy, is_success,
};
pub use transport::{DEFAULT_REQUEST_TIMEOUT, HttpTransport, Transport, TransportError};
