//! Reporter Layer
//!
//! Schedules reporting cycles and reacts to host lifecycle events.
//!
//! # Architecture
//!
//! - [`Reporter`]: timer, catch-up logic and per-cycle tasks
//! - [`LifecycleEvent`]: "became active" notifications delivered over a channel
//!
//! A reporting cycle reads the metric source, records the attempt time,
//! acquires an execution-window grant, then encodes and delivers the sample
//! in its own task.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use beacon::delivery::{DeliveryClient, HttpTransport, DEFAULT_REQUEST_TIMEOUT};
//! use beacon::reporter::{Reporter, ReporterConfig, LifecycleEvent, lifecycle_channel};
//! use beacon::window::{ExecutionGuard, UnrestrictedHost};
//! use beacon::SysfsBattery;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(HttpTransport::new(DEFAULT_REQUEST_TIMEOUT)?);
//! let reporter = Reporter::new(
//!     ReporterConfig::default(),
//!     Arc::new(SysfsBattery::default()),
//!     DeliveryClient::new(transport, "https://collector.example.com/ingest"),
//!     ExecutionGuard::new(Arc::new(UnrestrictedHost::new())),
//! );
//!
//! let (events, rx) = lifecycle_channel();
//! reporter.listen(rx);
//! reporter.start().await;
//! events.send(LifecycleEvent::BecameActive).await?;
//! # Ok(())
//! # }
//! ```

mod lifecycle;
mod scheduler;

pub use lifecycle::{DEFAULT_EVENT_CAPACITY, LifecycleEvent, lifecycle_channel};
pub use scheduler::{
    CycleOutcome, CycleTrigger, DEFAULT_GRANT_LABEL, DEFAULT_INTERVAL, MIN_INTERVAL, Reporter,
    ReporterConfig, ReporterStats,
};
