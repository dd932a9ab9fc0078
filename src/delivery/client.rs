//! Bounded-retry delivery of a single envelope.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};
use thiserror::Error;

use super::transport::{Transport, TransportError};
use crate::envelope::EncodedEnvelope;

/// Default number of send attempts per sample.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default fixed delay after each failed attempt (2 seconds).
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(2);

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_backoff() -> Duration {
    DEFAULT_BACKOFF
}

/// Fixed-delay retry policy. No exponential growth, no jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Send attempts per sample (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay after each failed attempt (default: 2s).
    #[serde(default = "default_backoff", with = "humantime_serde")]
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Set the attempt cap.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the backoff delay.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Final result of a delivery sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum DeliveryOutcome {
    /// A 2xx response was received.
    Delivered,
    /// The attempt budget ran out; the sample is discarded.
    Exhausted,
}

/// Why a single attempt did not deliver. Every variant is retryable.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Response status outside `200..=299`. 4xx and 5xx are not distinguished.
    #[error("rejected with status {0}")]
    RejectedStatus(u16),
}

/// Whether `status` counts as a successful delivery.
pub fn is_success(status: u16) -> bool {
    (200..=299).contains(&status)
}

/// Delivers envelopes to one endpoint with bounded, fixed-delay retries.
///
/// Errors never escape: callers only observe [`DeliveryOutcome`]. Failures
/// are reported through tracing.
#[derive(Clone)]
pub struct DeliveryClient {
    transport: Arc<dyn Transport>,
    endpoint: String,
    policy: RetryPolicy,
}

impl DeliveryClient {
    /// Create a client with the default [`RetryPolicy`].
    pub fn new(transport: Arc<dyn Transport>, endpoint: impl Into<String>) -> Self {
        Self {
            transport,
            endpoint: endpoint.into(),
            policy: RetryPolicy::default(),
        }
    }

    /// Set the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Deliver `envelope` using the configured attempt cap.
    pub async fn deliver(&self, envelope: &EncodedEnvelope) -> DeliveryOutcome {
        self.deliver_with_attempts(envelope, self.policy.max_attempts)
            .await
    }

    /// Deliver `envelope` with at most `max_attempts` sends.
    ///
    /// Each failed attempt is followed by the backoff delay, including the
    /// last one. With `max_attempts == 0` nothing is sent.
    pub async fn deliver_with_attempts(
        &self,
        envelope: &EncodedEnvelope,
        max_attempts: u32,
    ) -> DeliveryOutcome {
        let mut remaining = max_attempts;
        let mut attempt = 0u32;

        loop {
            if remaining == 0 {
                tracing::warn!(
                    endpoint = %self.endpoint,
                    attempts = attempt,
                    "Max delivery attempts reached, dropping sample"
                );
                return DeliveryOutcome::Exhausted;
            }
            attempt += 1;

            match self.attempt(envelope).await {
                Ok(status) => {
                    tracing::info!(
                        endpoint = %self.endpoint,
                        attempt,
                        status,
                        "Sample delivered"
                    );
                    return DeliveryOutcome::Delivered;
                }
                Err(e) => {
                    tracing::warn!(
                        endpoint = %self.endpoint,
                        attempt,
                        remaining = remaining - 1,
                        backoff_ms = self.policy.backoff.as_millis(),
                        error = %e,
                        "Delivery attempt failed"
                    );
                    tokio::time::sleep(self.policy.backoff).await;
                    remaining -= 1;
                }
            }
        }
    }

    async fn attempt(&self, envelope: &EncodedEnvelope) -> Result<u16, AttemptError> {
        tracing::debug!(
            endpoint = %self.endpoint,
            bytes = envelope.len(),
            "Posting sample"
        );

        let status = self
            .transport
            .post(&self.endpoint, envelope.payload())
            .await?;

        if is_success(status) {
            Ok(status)
        } else {
            Err(AttemptError::RejectedStatus(status))
        }
    }
}

impl std::fmt::Debug for DeliveryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryClient")
            .field("endpoint", &self.endpoint)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
