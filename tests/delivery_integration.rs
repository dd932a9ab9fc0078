//! Delivery Integration Tests for Beacon
//!
//! Runs a local collector and delivers samples through the real HTTP transport.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::post;
use axum::Router;
use beacon::delivery::{DeliveryClient, DeliveryOutcome, HttpTransport, RetryPolicy};
use beacon::reporter::{Reporter, ReporterConfig};
use beacon::window::{ExecutionGuard, UnrestrictedHost};
use beacon::{FixedLevel, Sample, decode, encode};
use chrono::Utc;
use tokio::net::TcpListener;

// =============================================================================
// Test Helpers
// =============================================================================

/// Request as seen by the collector.
#[derive(Debug, Clone)]
struct Received {
    content_type: Option<String>,
    body: Bytes,
}

/// Collector that answers with scripted statuses (200 once the script runs out).
#[derive(Clone, Default)]
struct Collector {
    statuses: Arc<Mutex<VecDeque<u16>>>,
    received: Arc<Mutex<Vec<Received>>>,
}

impl Collector {
    fn scripted(statuses: impl IntoIterator<Item = u16>) -> Self {
        Self {
            statuses: Arc::new(Mutex::new(statuses.into_iter().collect())),
            ..Default::default()
        }
    }

    fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }
}

async fn ingest(State(collector): State<Collector>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    collector
        .received
        .lock()
        .unwrap()
        .push(Received { content_type, body });

    let status = collector.statuses.lock().unwrap().pop_front().unwrap_or(200);
    StatusCode::from_u16(status).unwrap()
}

/// Start collector and return its ingest URL.
async fn start_collector(collector: Collector) -> String {
    let router = Router::new()
        .route("/posts", post(ingest))
        .with_state(collector);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let addr = listener.local_addr().expect("Failed to get local addr");

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    // Give server time to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    format!("http://{}/posts", addr)
}

fn client(url: &str, policy: RetryPolicy) -> DeliveryClient {
    let transport = Arc::new(HttpTransport::new(Duration::from_secs(5)).unwrap());
    DeliveryClient::new(transport, url).with_policy(policy)
}

fn fast_retries(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::default()
        .with_max_attempts(max_attempts)
        .with_backoff(Duration::from_millis(10))
}

// =============================================================================
// Delivery Client Tests
// =============================================================================

#[tokio::test]
async fn test_delivered_payload_decodes() {
    let collector = Collector::scripted([201]);
    let url = start_collector(collector.clone()).await;

    let sample = Sample::new(0.64, Utc::now());
    let envelope = encode(&sample).unwrap();
    let outcome = client(&url, RetryPolicy::default()).deliver(&envelope).await;

    assert_eq!(outcome, DeliveryOutcome::Delivered);

    let received = collector.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].content_type.as_deref(), Some("application/json"));

    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert!(body["data"].is_string());
    assert_eq!(decode(&received[0].body).unwrap(), sample);
}

#[tokio::test]
async fn test_retries_rejected_statuses() {
    let collector = Collector::scripted([500, 404, 204]);
    let url = start_collector(collector.clone()).await;

    let envelope = encode(&Sample::new(0.5, Utc::now())).unwrap();
    let outcome = client(&url, fast_retries(3)).deliver(&envelope).await;

    assert_eq!(outcome, DeliveryOutcome::Delivered);
    assert_eq!(collector.received().len(), 3);
}

#[tokio::test]
async fn test_exhausts_on_persistent_rejection() {
    let collector = Collector::scripted([503, 503, 503, 503]);
    let url = start_collector(collector.clone()).await;

    let envelope = encode(&Sample::new(0.5, Utc::now())).unwrap();
    let outcome = client(&url, fast_retries(3)).deliver(&envelope).await;

    assert_eq!(outcome, DeliveryOutcome::Exhausted);
    assert_eq!(collector.received().len(), 3);
}

#[tokio::test]
async fn test_exhausts_when_collector_unreachable() {
    // Reserve a port, then free it so nothing is listening there
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let envelope = encode(&Sample::new(0.5, Utc::now())).unwrap();
    let outcome = client(&format!("http://{}/posts", addr), fast_retries(2))
        .deliver(&envelope)
        .await;

    assert_eq!(outcome, DeliveryOutcome::Exhausted);
}

// =============================================================================
// Reporter Tests
// =============================================================================

#[tokio::test]
async fn test_reporter_sends_on_start() {
    let collector = Collector::default();
    let url = start_collector(collector.clone()).await;

    let reporter = Reporter::new(
        ReporterConfig::default(),
        Arc::new(FixedLevel(0.8)),
        client(&url, RetryPolicy::default()),
        ExecutionGuard::new(Arc::new(UnrestrictedHost::new())),
    );
    assert!(reporter.start().await);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while reporter.stats().delivered == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let received = collector.received();
    assert_eq!(received.len(), 1);
    assert_eq!(decode(&received[0].body).unwrap().value(), 0.8);

    reporter.stop().await;
}
