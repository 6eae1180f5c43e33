//! Relay behaviour against a local stand-in aggregator.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use axum::{Router, extract::State, http::StatusCode, routing::post};
use time::macros::datetime;
use tokio::sync::Mutex;
use weather_service::sync::{ConnectivityProbe, Relay, Syncer};
use weather_service::{AppState, Config, ingest};
use weather_store::StoredReading;
use weather_types::TimestampPolicy;

#[derive(Default)]
struct Aggregator {
    status: AtomicU16,
    bodies: Mutex<Vec<String>>,
}

async fn receive(State(agg): State<Arc<Aggregator>>, body: String) -> StatusCode {
    agg.bodies.lock().await.push(body);
    StatusCode::from_u16(agg.status.load(Ordering::SeqCst)).unwrap_or(StatusCode::OK)
}

/// Start an aggregator answering every POST with `status`.
async fn spawn_aggregator(status: u16) -> (SocketAddr, Arc<Aggregator>) {
    let agg = Arc::new(Aggregator {
        status: AtomicU16::new(status),
        bodies: Mutex::new(Vec::new()),
    });
    let app = Router::new()
        .route("/ingest", post(receive))
        .with_state(Arc::clone(&agg));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, agg)
}

/// An address nothing listens on.
async fn closed_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

fn open_state(mut config: Config) -> (tempfile::TempDir, Arc<AppState>) {
    let dir = tempfile::tempdir().unwrap();
    config.storage.path = dir.path().join("weather.db");
    (dir, AppState::open(config, None).unwrap())
}

fn sync_state(url: String) -> (tempfile::TempDir, Arc<AppState>) {
    let mut config = Config::default();
    config.sync.enabled = true;
    config.sync.url = url;
    open_state(config)
}

async fn stored(state: &AppState) -> Vec<StoredReading> {
    state.db.run(|store| store.recent(10)).await.unwrap()
}

fn syncer(state: &Arc<AppState>, probe: SocketAddr) -> Syncer {
    let probe = ConnectivityProbe::new(vec![probe.to_string()], Duration::from_millis(500));
    let relay = Relay::new(state.config.sync.url.clone(), Duration::from_secs(2)).unwrap();
    Syncer::new(Arc::clone(state), probe, relay)
}

async fn ingest_minutes(state: &Arc<AppState>, minutes: &[u32]) {
    for minute in minutes {
        let raw = format!("dateutc=2024-05-01+03:{minute:02}:00&tempf=68&humidity=50&id=4");
        let outcome = ingest(
            state,
            &raw,
            TimestampPolicy::Device,
            datetime!(2024-05-01 12:00:00),
        )
        .await;
        assert!(outcome.is_stored());
    }
}

async fn pending_ids(state: &Arc<AppState>) -> Vec<(i64, u32)> {
    state
        .sync_queue
        .snapshot()
        .await
        .into_iter()
        .map(|e| (e.row_id, e.attempts))
        .collect()
}

#[tokio::test]
async fn test_unreachable_relay_keeps_reading_queued() {
    let dead = closed_addr().await;
    let (_dir, state) = sync_state(format!("http://{dead}/ingest"));

    let before = state.sync_queue.len().await;
    ingest_minutes(&state, &[0]).await;
    assert_eq!(state.sync_queue.len().await, before + 1);

    let report = syncer(&state, dead).run_once().await;
    assert_eq!(report.online, Some(false));
    assert_eq!(report.sent, 0);
    assert_eq!(report.remaining, 1);
    assert_eq!(pending_ids(&state).await, vec![(1, 0)]);
    assert!(state.sync_queue.oldest_enqueued_at().await.is_some());
    assert!(state.last_sync.read().await.is_some());
}

#[tokio::test]
async fn test_successful_pass_drains_queue_in_order() {
    let (addr, agg) = spawn_aggregator(200).await;
    let (_dir, state) = sync_state(format!("http://{addr}/ingest"));
    ingest_minutes(&state, &[0, 1, 2]).await;

    let report = syncer(&state, addr).run_once().await;
    assert_eq!(report.online, Some(true));
    assert_eq!(report.sent, 3);
    assert_eq!(report.remaining, 0);
    assert!(report.error.is_none());

    let bodies = agg.bodies.lock().await;
    assert_eq!(bodies.len(), 3);
    for (body, minute) in bodies.iter().zip(["00", "01", "02"]) {
        assert!(body.contains(&format!("dateutc=2024-05-01+03%3A{minute}%3A00")));
        assert!(body.contains("humidity=50"));
        assert!(body.contains("id=4"));
    }

    let rows = stored(&state).await;
    assert!(rows.iter().all(|r| r.uploaded));
}

#[tokio::test]
async fn test_rejected_relay_is_requeued_in_order() {
    let (addr, agg) = spawn_aggregator(500).await;
    let (_dir, state) = sync_state(format!("http://{addr}/ingest"));
    ingest_minutes(&state, &[0, 1, 2]).await;

    let report = syncer(&state, addr).run_once().await;
    assert_eq!(report.online, Some(true));
    assert_eq!(report.sent, 0);
    assert_eq!(
        report.error.as_deref(),
        Some("Aggregator returned 500 Internal Server Error")
    );
    // Only the first entry was tried; nothing was lost or reordered.
    assert_eq!(pending_ids(&state).await, vec![(1, 1), (2, 0), (3, 0)]);
    assert_eq!(agg.bodies.lock().await.len(), 1);

    let rows = stored(&state).await;
    assert!(rows.iter().all(|r| !r.uploaded));

    // Once the aggregator recovers everything goes through.
    agg.status.store(200, Ordering::SeqCst);
    let report = syncer(&state, addr).run_once().await;
    assert_eq!(report.sent, 3);
    assert!(state.sync_queue.is_empty().await);
}

#[tokio::test]
async fn test_relay_connection_error_is_not_fatal() {
    let (probe_addr, _agg) = spawn_aggregator(200).await;
    let dead = closed_addr().await;
    let (_dir, state) = sync_state(format!("http://{dead}/ingest"));
    ingest_minutes(&state, &[0, 1]).await;

    let report = syncer(&state, probe_addr).run_once().await;
    assert_eq!(report.online, Some(true));
    assert_eq!(report.sent, 0);
    assert!(report.error.is_some());
    assert_eq!(pending_ids(&state).await, vec![(1, 1), (2, 0)]);
}

#[tokio::test]
async fn test_queue_bound_drops_oldest() {
    let mut config = Config::default();
    config.sync.enabled = true;
    config.sync.url = "http://127.0.0.1:9/ingest".to_string();
    config.sync.queue_capacity = 2;
    let (_dir, state) = open_state(config);

    ingest_minutes(&state, &[0, 1, 2]).await;
    assert_eq!(pending_ids(&state).await, vec![(2, 0), (3, 0)]);
    assert_eq!(state.sync_queue.dropped(), 1);
}

#[tokio::test]
async fn test_empty_queue_skips_probe() {
    let dead = closed_addr().await;
    let (_dir, state) = sync_state(format!("http://{dead}/ingest"));

    // Connectivity was never checked, so it is not reported either way.
    let report = syncer(&state, dead).run_once().await;
    assert_eq!(report.online, None);
    assert_eq!(report.sent, 0);
    assert_eq!(report.remaining, 0);
    assert_eq!(
        state.last_sync.read().await.as_ref().and_then(|r| r.online),
        None
    );
}
