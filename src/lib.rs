//! Beacon - Periodic Device Telemetry Reporter
//!
//! This crate samples a device metric (battery level) on a fixed period and
//! reports it to a remote collector over HTTP. It can be used as a library
//! or run as a standalone binary with the `beacon` executable.
//!
//! # Architecture
//!
//! - **Sample**: one metric reading plus its capture time, read from a [`MetricSource`]
//! - **Envelope**: double-encoded JSON payload (`{"data": "<base64 of inner JSON>"}`)
//! - **Delivery**: bounded, fixed-backoff retries over a pluggable [`Transport`]
//! - **Window**: best-effort execution grants from the host while a sample is in flight
//! - **Reporter**: timer, catch-up on reactivation, one task per reporting cycle
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use beacon::config::AppConfig;
//! use beacon::delivery::{DeliveryClient, HttpTransport};
//! use beacon::reporter::Reporter;
//! use beacon::window::ExecutionGuard;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load("configs/beacon.yaml")?;
//!     let transport = Arc::new(HttpTransport::new(config.request_timeout)?);
//!     let client = DeliveryClient::new(transport, config.endpoint.clone())
//!         .with_policy(config.retry);
//!
//!     let reporter = Reporter::new(
//!         config.reporter_config(),
//!         config.source.build(),
//!         client,
//!         ExecutionGuard::new(config.execution_window.build_host()),
//!     );
//!     reporter.start().await;
//!
//!     tokio::signal::ctrl_c().await?;
//!     reporter.stop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod delivery;
pub mod envelope;
pub mod reporter;
pub mod sample;
pub mod window;

pub use delivery::{DeliveryClient, DeliveryOutcome, HttpTransport, RetryPolicy, Transport};
pub use envelope::{DecodeError, EncodeError, EncodedEnvelope, decode, encode};
pub use reporter::{LifecycleEvent, Reporter, ReporterConfig};
pub use sample::{FixedLevel, MetricSource, Sample, SysfsBattery, UNAVAILABLE};
pub use window::{ExecutionGuard, ExecutionHost, GrantHandle, TimeBoxedHost, UnrestrictedHost};
