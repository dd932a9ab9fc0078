//! Reporting scheduler.
//!
//! Owns the timing of reporting cycles: an immediate cycle on start, one per
//! period after that, and catch-up cycles when the host reactivates the
//! process after the period has been exceeded.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use strum_macros::{AsRefStr, Display};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;
use uuid::Uuid;

use crate::delivery::{DeliveryClient, DeliveryOutcome};
use crate::envelope::encode;
use crate::sample::{MetricSource, Sample};
use crate::window::{ExecutionGuard, GrantHandle};

/// Default reporting period (120 seconds).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(120);

/// Minimum allowed reporting period (1 second).
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Default label for execution-window grants.
pub const DEFAULT_GRANT_LABEL: &str = "SendBatteryData";

/// Scheduler timing and naming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReporterConfig {
    /// Timer period.
    pub interval: Duration,
    /// Time since the last attempt after which reactivation forces a
    /// catch-up cycle.
    pub stale_after: Duration,
    /// Label passed to the execution host for each grant.
    pub grant_label: String,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            stale_after: DEFAULT_INTERVAL,
            grant_label: DEFAULT_GRANT_LABEL.to_string(),
        }
    }
}

impl ReporterConfig {
    /// Set the timer period, clamped to a minimum of 1 second.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if interval < MIN_INTERVAL {
            tracing::warn!(min_interval = ?MIN_INTERVAL,
                "Interval duration is less than minimum allowed. Using minimum duration."
            );
            self.interval = MIN_INTERVAL;
        } else {
            self.interval = interval;
        }
        self
    }

    /// Set the catch-up threshold.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_grant_label(mut self, label: impl Into<String>) -> Self {
        self.grant_label = label.into();
        self
    }
}

/// What started a reporting cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum CycleTrigger {
    /// Immediate cycle fired by `start`.
    Startup,
    /// Periodic timer firing.
    Timer,
    /// Reactivation found the last attempt stale.
    CatchUp,
    /// Explicit `trigger_now` call.
    Manual,
}

/// How a reporting cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum CycleOutcome {
    Delivered,
    Exhausted,
    /// The sample could not be encoded and was discarded.
    Dropped,
}

impl From<DeliveryOutcome> for CycleOutcome {
    fn from(outcome: DeliveryOutcome) -> Self {
        match outcome {
            DeliveryOutcome::Delivered => Self::Delivered,
            DeliveryOutcome::Exhausted => Self::Exhausted,
        }
    }
}

/// Snapshot of cycle counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReporterStats {
    pub cycles_started: u64,
    pub delivered: u64,
    pub exhausted: u64,
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    cycles_started: AtomicU64,
    delivered: AtomicU64,
    exhausted: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: CycleOutcome) {
        let counter = match outcome {
            CycleOutcome::Delivered => &self.delivered,
            CycleOutcome::Exhausted => &self.exhausted,
            CycleOutcome::Dropped => &self.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ReporterStats {
        ReporterStats {
            cycles_started: self.cycles_started.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Timer handle and last attempt time. Written only by scheduler logic,
/// always under the state lock.
#[derive(Debug, Default)]
struct SchedulerState {
    timer: Option<JoinHandle<()>>,
    last_attempt_at: Option<Instant>,
}

impl SchedulerState {
    fn timer_active(&self) -> bool {
        self.timer.as_ref().is_some_and(|timer| !timer.is_finished())
    }
}

struct Inner {
    config: ReporterConfig,
    source: Arc<dyn MetricSource>,
    client: DeliveryClient,
    guard: ExecutionGuard,
    state: Mutex<SchedulerState>,
    stats: Counters,
}

/// Periodic telemetry reporter.
///
/// Cheap to clone; clones share the same timer and state. Cycles run as
/// independent tokio tasks and may overlap: a new cycle never waits for or
/// cancels one that is still retrying.
#[derive(Clone)]
pub struct Reporter {
    inner: Arc<Inner>,
}

impl Reporter {
    /// Create an idle reporter.
    ///
    /// An `interval` below [`MIN_INTERVAL`] is raised to it.
    pub fn new(
        config: ReporterConfig,
        source: Arc<dyn MetricSource>,
        client: DeliveryClient,
        guard: ExecutionGuard,
    ) -> Self {
        let interval = config.interval;
        let config = config.with_interval(interval);

        Self {
            inner: Arc::new(Inner {
                config,
                source,
                client,
                guard,
                state: Mutex::new(SchedulerState::default()),
                stats: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &ReporterConfig {
        &self.inner.config
    }

    /// Arm the periodic timer and fire one cycle right away.
    ///
    /// Returns `false` without doing anything if the timer is already armed.
    pub async fn start(&self) -> bool {
        let mut state = self.inner.state.lock().await;
        self.start_locked(&mut state)
    }

    /// Disarm the timer. Cycles already in flight run to completion.
    ///
    /// Returns `false` if the timer was not armed.
    pub async fn stop(&self) -> bool {
        let mut state = self.inner.state.lock().await;
        match state.timer.take() {
            Some(timer) => {
                let was_active = !timer.is_finished();
                timer.abort();
                tracing::info!("Reporter stopped");
                was_active
            }
            None => false,
        }
    }

    /// Whether the periodic timer is armed.
    pub async fn is_running(&self) -> bool {
        self.inner.state.lock().await.timer_active()
    }

    /// When the most recent cycle was initiated.
    pub async fn last_attempt_at(&self) -> Option<Instant> {
        self.inner.state.lock().await.last_attempt_at
    }

    pub fn stats(&self) -> ReporterStats {
        self.inner.stats.snapshot()
    }

    /// Handle the host reporting that the process became active again.
    ///
    /// Re-arms the timer if it was lost. Independently, fires a catch-up cycle
    /// if more than `stale_after` has passed since the last attempt. Returns
    /// whether a catch-up cycle was fired.
    pub async fn on_became_active(&self) -> bool {
        let mut state = self.inner.state.lock().await;

        if !state.timer_active() {
            tracing::info!("Reporting timer not armed, restarting");
            self.start_locked(&mut state);
        }

        let now = Instant::now();
        let stale = state
            .last_attempt_at
            .is_some_and(|last| now.duration_since(last) > self.inner.config.stale_after);

        if stale {
            tracing::info!(
                stale_after_secs = self.inner.config.stale_after.as_secs(),
                "Last report is stale, sending catch-up sample"
            );
            self.begin_cycle(&mut state, CycleTrigger::CatchUp);
        }
        stale
    }

    /// Fire an out-of-band cycle and return its handle.
    pub async fn trigger_now(&self) -> JoinHandle<CycleOutcome> {
        let mut state = self.inner.state.lock().await;
        self.begin_cycle(&mut state, CycleTrigger::Manual)
    }

    // --- Private helpers ---

    fn start_locked(&self, state: &mut SchedulerState) -> bool {
        if state.timer_active() {
            tracing::debug!("Reporter already running");
            return false;
        }

        state.timer = Some(self.spawn_timer());
        self.begin_cycle(state, CycleTrigger::Startup);

        tracing::info!(
            interval_secs = self.inner.config.interval.as_secs(),
            endpoint = %self.inner.client.endpoint(),
            "Reporter started"
        );
        true
    }

    /// Sample now, record the attempt, take a grant and hand delivery to its
    /// own task. The grant is held before the task exists.
    fn begin_cycle(
        &self,
        state: &mut SchedulerState,
        trigger: CycleTrigger,
    ) -> JoinHandle<CycleOutcome> {
        let sample = Sample::capture(&*self.inner.source);
        state.last_attempt_at = Some(Instant::now());
        self.inner.stats.cycles_started.fetch_add(1, Ordering::Relaxed);
        let grant = self.inner.guard.acquire(&self.inner.config.grant_label);

        let cycle_id = Uuid::new_v4();
        let span = tracing::info_span!("report_cycle", cycle_id = %cycle_id, trigger = %trigger);
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move { inner.run_cycle(sample, grant).await }.instrument(span))
    }

    fn spawn_timer(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    tracing::debug!("Reporter dropped, timer exiting");
                    break;
                };

                let reporter = Reporter { inner };
                let mut state = reporter.inner.state.lock().await;
                reporter.begin_cycle(&mut state, CycleTrigger::Timer);
            }
        })
    }
}

impl Inner {
    async fn run_cycle(&self, sample: Sample, grant: GrantHandle) -> CycleOutcome {
        tracing::debug!(
            battery_level = sample.value(),
            unavailable = sample.is_unavailable(),
            captured_at = %sample.captured_at(),
            "Reporting cycle started"
        );

        let outcome = match encode(&sample) {
            Ok(envelope) => self.client.deliver(&envelope).await.into(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode sample, dropping");
                CycleOutcome::Dropped
            }
        };

        grant.release();
        self.stats.record(outcome);

        tracing::debug!(%outcome, "Reporting cycle finished");
        outcome
    }
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("config", &self.inner.config)
            .field("client", &self.inner.client)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{RetryPolicy, Transport, TransportError};
    use crate::envelope::decode;
    use crate::window::{
        ExecutionHost, ExpiryHandler, GrantToken, TimeBoxedHost, UnrestrictedHost,
    };

    /// Transport that answers every request with the same status and keeps
    /// the bodies it saw.
    struct RecordingTransport {
        status: Option<u16>,
        bodies: std::sync::Mutex<Vec<Vec<u8>>>,
    }

    impl RecordingTransport {
        fn answering(status: u16) -> Arc<Self> {
            Arc::new(Self {
                status: Some(status),
                bodies: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn unreachable() -> Arc<Self> {
            Arc::new(Self {
                status: None,
                bodies: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn bodies(&self) -> Vec<Vec<u8>> {
            self.bodies.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Transport for RecordingTransport {
        async fn post(&self, _url: &str, body: &[u8]) -> Result<u16, TransportError> {
            self.bodies.lock().unwrap().push(body.to_vec());
            self.status
                .ok_or_else(|| TransportError::Connect("connection refused".into()))
        }
    }

    /// Time-boxed host that also counts `end` calls.
    struct CountingHost {
        inner: TimeBoxedHost,
        ended: AtomicU64,
    }

    impl CountingHost {
        fn new(budget: Duration) -> Self {
            Self {
                inner: TimeBoxedHost::new(budget),
                ended: AtomicU64::new(0),
            }
        }

        fn ended(&self) -> u64 {
            self.ended.load(Ordering::SeqCst)
        }
    }

    impl ExecutionHost for CountingHost {
        fn begin(&self, label: &str, on_expire: ExpiryHandler) -> GrantToken {
            self.inner.begin(label, on_expire)
        }

        fn end(&self, token: GrantToken) {
            self.ended.fetch_add(1, Ordering::SeqCst);
            self.inner.end(token);
        }
    }

    fn reporter_with(
        config: ReporterConfig,
        source: Arc<dyn MetricSource>,
        transport: Arc<RecordingTransport>,
    ) -> Reporter {
        let client = DeliveryClient::new(transport, "http://collector.test/ingest");
        let guard = ExecutionGuard::new(Arc::new(UnrestrictedHost::new()));
        Reporter::new(config, source, client, guard)
    }

    fn reporter(transport: Arc<RecordingTransport>) -> Reporter {
        reporter_with(ReporterConfig::default(), Arc::new(|| 0.5), transport)
    }

    /// Let spawned cycles run without moving past the next timer.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[test]
    fn test_config_defaults() {
        let config = ReporterConfig::default();
        assert_eq!(config.interval, Duration::from_secs(120));
        assert_eq!(config.stale_after, Duration::from_secs(120));
        assert_eq!(config.grant_label, DEFAULT_GRANT_LABEL);
    }

    #[test]
    fn test_config_interval_minimum() {
        let config = ReporterConfig::default().with_interval(Duration::from_millis(100));
        assert_eq!(config.interval, MIN_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_arms_single_timer() {
        let transport = RecordingTransport::answering(200);
        let reporter = reporter(transport.clone());

        assert!(reporter.start().await);
        assert!(!reporter.start().await);
        assert!(reporter.is_running().await);

        settle().await;
        assert_eq!(reporter.stats().cycles_started, 1);
        assert_eq!(transport.bodies().len(), 1);
        assert_eq!(reporter.stats().delivered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_every_interval() {
        let transport = RecordingTransport::answering(200);
        let reporter = reporter(transport.clone());
        reporter.start().await;

        tokio::time::sleep(Duration::from_secs(119)).await;
        assert_eq!(reporter.stats().cycles_started, 1);

        tokio::time::sleep(Duration::from_secs(122)).await;
        assert_eq!(reporter.stats().cycles_started, 3);
        assert_eq!(transport.bodies().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_attempt_recorded_before_delivery_resolves() {
        let transport = RecordingTransport::unreachable();
        let reporter = reporter(transport);

        let before = Instant::now();
        let cycle = reporter.trigger_now().await;
        assert_eq!(reporter.last_attempt_at().await, Some(before));

        assert_eq!(cycle.await.unwrap(), CycleOutcome::Exhausted);
        assert_eq!(reporter.stats().exhausted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_became_active_fires_catch_up_when_stale() {
        let transport = RecordingTransport::answering(200);
        let config = ReporterConfig::default()
            .with_interval(Duration::from_secs(600))
            .with_stale_after(Duration::from_secs(120));
        let reporter = reporter_with(config, Arc::new(|| 0.5), transport.clone());
        reporter.start().await;

        tokio::time::sleep(Duration::from_secs(150)).await;
        assert!(reporter.on_became_active().await);
        assert!(reporter.is_running().await);
        assert_eq!(reporter.stats().cycles_started, 2);

        // The catch-up cycle is now the latest attempt.
        assert!(!reporter.on_became_active().await);
        settle().await;
        assert_eq!(reporter.stats().cycles_started, 2);
        assert_eq!(transport.bodies().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_became_active_within_interval_is_quiet() {
        let transport = RecordingTransport::answering(200);
        let reporter = reporter(transport);
        reporter.start().await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!reporter.on_became_active().await);
        assert_eq!(reporter.stats().cycles_started, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_became_active_restarts_lost_timer() {
        let transport = RecordingTransport::answering(200);
        let reporter = reporter(transport);
        reporter.start().await;
        assert!(reporter.stop().await);
        assert!(!reporter.is_running().await);

        tokio::time::sleep(Duration::from_secs(150)).await;
        assert_eq!(reporter.stats().cycles_started, 1);

        // Restart fires its own immediate cycle, which makes the last
        // attempt fresh again: no extra catch-up.
        assert!(!reporter.on_became_active().await);
        assert!(reporter.is_running().await);
        assert_eq!(reporter.stats().cycles_started, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_became_active_before_start() {
        let transport = RecordingTransport::answering(200);
        let reporter = reporter(transport);

        assert!(!reporter.on_became_active().await);
        assert!(reporter.is_running().await);
        assert_eq!(reporter.stats().cycles_started, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_level_is_still_sent() {
        let transport = RecordingTransport::answering(200);
        let reporter = reporter_with(
            ReporterConfig::default(),
            Arc::new(|| crate::sample::UNAVAILABLE),
            transport.clone(),
        );
        reporter.start().await;
        settle().await;

        let bodies = transport.bodies();
        assert_eq!(bodies.len(), 1);
        assert!(decode(&bodies[0]).unwrap().is_unavailable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycles_overlap() {
        let transport = RecordingTransport::unreachable();
        let reporter = reporter(transport.clone());

        let start = Instant::now();
        let first = reporter.trigger_now().await;
        let second = reporter.trigger_now().await;

        assert_eq!(first.await.unwrap(), CycleOutcome::Exhausted);
        assert_eq!(second.await.unwrap(), CycleOutcome::Exhausted);

        // Both sequences ran side by side: 3 attempts x 2s backoff each.
        assert_eq!(start.elapsed(), Duration::from_secs(6));
        assert_eq!(transport.bodies().len(), 6);
        assert_eq!(reporter.stats().exhausted, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grant_held_for_cycle_and_released() {
        let transport = RecordingTransport::unreachable();
        let host = Arc::new(TimeBoxedHost::new(Duration::from_secs(30)));
        let client = DeliveryClient::new(transport, "http://collector.test/ingest")
            .with_policy(RetryPolicy::default().with_max_attempts(2));
        let reporter = Reporter::new(
            ReporterConfig::default(),
            Arc::new(|| 0.9),
            client,
            ExecutionGuard::new(host.clone()),
        );

        // Held as soon as the cycle is scheduled, before its task has run.
        let cycle = reporter.trigger_now().await;
        assert_eq!(host.live_grants(), 1);

        settle().await;
        assert_eq!(host.live_grants(), 1);

        cycle.await.unwrap();
        assert_eq!(host.live_grants(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grant_expiry_does_not_stop_delivery() {
        let transport = RecordingTransport::unreachable();
        let host = Arc::new(CountingHost::new(Duration::from_secs(1)));
        let client = DeliveryClient::new(transport.clone(), "http://collector.test/ingest");
        let reporter = Reporter::new(
            ReporterConfig::default(),
            Arc::new(|| 0.4),
            client,
            ExecutionGuard::new(host.clone()),
        );

        let start = Instant::now();
        let cycle = reporter.trigger_now().await;

        // The budget runs out during the first backoff.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(host.inner.live_grants(), 0);
        assert_eq!(host.ended(), 1);
        assert_eq!(transport.bodies().len(), 1);

        assert_eq!(cycle.await.unwrap(), CycleOutcome::Exhausted);
        assert_eq!(start.elapsed(), Duration::from_secs(6));
        assert_eq!(transport.bodies().len(), 3);
        assert_eq!(host.ended(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_in_config_is_raised() {
        let transport = RecordingTransport::answering(200);
        let config = ReporterConfig {
            interval: Duration::ZERO,
            ..ReporterConfig::default()
        };
        let reporter = reporter_with(config, Arc::new(|| 0.5), transport.clone());
        assert_eq!(reporter.config().interval, MIN_INTERVAL);

        assert!(reporter.start().await);
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(reporter.is_running().await);
        assert_eq!(reporter.stats().cycles_started, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_leaves_in_flight_cycle_running() {
        let transport = RecordingTransport::unreachable();
        let reporter = reporter(transport.clone());
        reporter.start().await;
        settle().await;

        assert!(reporter.stop().await);
        assert!(!reporter.stop().await);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.bodies().len(), 3);
        assert_eq!(reporter.stats().exhausted, 1);
    }
}
