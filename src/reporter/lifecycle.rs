//! Host lifecycle events.
//!
//! The host pushes [`LifecycleEvent`]s into an mpsc channel; a listener task
//! forwards them to the [`Reporter`].

use strum_macros::Display;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::scheduler::Reporter;

/// Default lifecycle channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 16;

/// Lifecycle notification from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
#[non_exhaustive]
pub enum LifecycleEvent {
    /// The process was foregrounded or resumed.
    BecameActive,
}

/// Create a lifecycle channel with the default capacity.
pub fn lifecycle_channel() -> (mpsc::Sender<LifecycleEvent>, mpsc::Receiver<LifecycleEvent>) {
    mpsc::channel(DEFAULT_EVENT_CAPACITY)
}

impl Reporter {
    /// Consume lifecycle events until every sender is dropped.
    pub fn listen(&self, mut events: mpsc::Receiver<LifecycleEvent>) -> JoinHandle<()> {
        let reporter = self.clone();

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                tracing::debug!(%event, "Lifecycle event received");
                match event {
                    LifecycleEvent::BecameActive => {
                        reporter.on_became_active().await;
                    }
                }
            }
            tracing::debug!("Lifecycle channel closed");
        })
    }
}
