//! Two agents sharing one coordination transport.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use flipfleet::clock::{ManualClock, SystemClock};
use flipfleet::coord::file::SharedDocumentTransport;
use flipfleet::coord::http::{HttpSettings, HttpTransport};
use flipfleet::coord::server::{build_router, CoordinatorState};
use flipfleet::coord::Coordinator;

async fn spawn_server() -> String {
    let state = Arc::new(CoordinatorState::new(Arc::new(SystemClock)));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });
    format!("http://{addr}")
}

fn http_agent(agent_id: &str, base_url: &str, seed: u64) -> Coordinator {
    let settings = HttpSettings {
        base_url: base_url.to_string(),
        timeout: Duration::from_secs(2),
        backoff_initial: Duration::from_millis(5),
        backoff_max: Duration::from_millis(20),
        ..HttpSettings::default()
    };
    let clock = Arc::new(SystemClock);
    let transport = HttpTransport::new(settings, clock.clone(), StdRng::seed_from_u64(seed)).unwrap();
    Coordinator::new(agent_id, Arc::new(transport), clock)
}

fn document_path() -> PathBuf {
    std::env::temp_dir()
        .join(format!("flipfleet_it_{}", uuid::Uuid::new_v4().simple()))
        .join("limits.json")
}

#[tokio::test]
async fn test_http_agents_see_each_others_blocks() {
    let url = spawn_server().await;
    let a = http_agent("A", &url, 1);
    let b = http_agent("B", &url, 2);

    a.report("Maple logs").await;
    b.report("Maple logs").await;

    let seen_by_a = a.blocked_by_others().await;
    let seen_by_b = b.blocked_by_others().await;
    assert!(seen_by_a.contains("maple logs"));
    assert!(!seen_by_b.contains("maple logs"));

    b.report("Coal").await;
    assert!(a.blocked_by_others().await.contains("coal"));
    assert!(!b.blocked_by_others().await.contains("coal"));
    assert!(a.is_available());
}

#[tokio::test]
async fn test_unreachable_coordinator_means_no_information() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let a = http_agent("A", &url, 1);
    a.report("Maple logs").await;
    assert!(a.blocked_by_others().await.is_empty());
    assert!(!a.is_available());
    assert!(!a.health().await.available);
}

#[tokio::test]
async fn test_shared_document_agents_see_each_others_blocks() {
    let path = document_path();
    let clock = Arc::new(ManualClock::at_epoch(1_700_000_000));
    let agent = |id: &str| {
        let transport = SharedDocumentTransport::new(path.clone(), clock.clone(), Duration::ZERO);
        Coordinator::new(id, Arc::new(transport), clock.clone())
    };
    let a = agent("A");
    let b = agent("B");

    a.report("Maple logs").await;
    clock.advance_secs(1);
    b.report("Maple logs").await;

    assert!(a.blocked_by_others().await.contains("maple logs"));
    assert!(b.blocked_by_others().await.is_empty());

    // Entries lapse with the limit window.
    clock.advance_secs(4 * 3600);
    assert!(a.blocked_by_others().await.is_empty());

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}
