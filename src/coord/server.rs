//! Coordinator service.
//!
//! Axum router backing the networked transport. All endpoints are GET and
//! return JSON. Entries are keyed by case-folded item, so the latest report
//! for an item wins whoever sent it. Expiry is lazy: `/list` purges
//! anything older than the TTL.

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::ENTRY_TTL_SECS;
use crate::clock::Clock;
use crate::types::item_key;

/// Server-side lifetime: the limit window plus five minutes of grace.
pub const SERVER_TTL_SECS: i64 = ENTRY_TTL_SECS + 5 * 60;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ServerEntry {
    item: String,
    account: String,
    reported_at: DateTime<Utc>,
}

pub struct CoordinatorState {
    clock: Arc<dyn Clock>,
    started: DateTime<Utc>,
    entries: RwLock<HashMap<String, ServerEntry>>,
    total_requests: AtomicU64,
}

impl CoordinatorState {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let started = clock.now();
        Self {
            clock,
            started,
            entries: RwLock::new(HashMap::new()),
            total_requests: AtomicU64::new(0),
        }
    }

    fn hit(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn uptime_seconds(&self) -> i64 {
        (self.clock.now() - self.started).num_seconds().max(0)
    }
}

pub type SharedState = Arc<CoordinatorState>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ReportParams {
    item: Option<String>,
    account: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusBody {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListedEntry {
    pub item: String,
    pub account: String,
    pub age: i64,
}

#[derive(Debug, Serialize)]
pub struct ListBody {
    pub blocked: Vec<ListedEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthBody {
    pub status: &'static str,
    pub blocked_count: usize,
    pub uptime_seconds: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsEntry {
    pub item: String,
    pub account: String,
    pub age_seconds: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsBody {
    pub uptime: i64,
    pub total_requests: u64,
    pub blocked_items: usize,
    pub items: Vec<StatsEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearBody {
    pub status: &'static str,
    pub removed_count: usize,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /report?item=&account=
pub async fn report(State(state): State<SharedState>, Query(params): Query<ReportParams>) -> Response {
    state.hit();
    let item = params.item.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    let account = params.account.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

    let (Some(item), Some(account)) = (item, account) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: "Missing item or account",
            }),
        )
            .into_response();
    };

    let key = item_key(&item);
    let entry = ServerEntry {
        item: item.clone(),
        account: account.clone(),
        reported_at: state.clock.now(),
    };
    state.entries.write().await.insert(key, entry);
    info!(item = %item, account = %account, "Recorded limit report");

    Json(StatusBody { status: "recorded" }).into_response()
}

/// GET /list
pub async fn list(State(state): State<SharedState>) -> Json<ListBody> {
    state.hit();
    let now = state.clock.now();
    let mut entries = state.entries.write().await;
    entries.retain(|_, e| (now - e.reported_at).num_seconds() <= SERVER_TTL_SECS);

    let mut blocked: Vec<ListedEntry> = entries
        .values()
        .map(|e| ListedEntry {
            item: e.item.clone(),
            account: e.account.clone(),
            age: (now - e.reported_at).num_seconds().max(0),
        })
        .collect();
    blocked.sort_by(|a, b| a.item.cmp(&b.item).then_with(|| a.account.cmp(&b.account)));
    Json(ListBody { blocked })
}

/// GET /health
pub async fn health(State(state): State<SharedState>) -> Json<HealthBody> {
    state.hit();
    Json(HealthBody {
        status: "ok",
        blocked_count: state.entries.read().await.len(),
        uptime_seconds: state.uptime_seconds(),
    })
}

/// GET /stats
pub async fn stats(State(state): State<SharedState>) -> Json<StatsBody> {
    state.hit();
    let now = state.clock.now();
    let entries = state.entries.read().await;
    let mut items: Vec<StatsEntry> = entries
        .values()
        .map(|e| StatsEntry {
            item: e.item.clone(),
            account: e.account.clone(),
            age_seconds: (now - e.reported_at).num_seconds().max(0),
        })
        .collect();
    items.sort_by(|a, b| a.item.cmp(&b.item));

    Json(StatsBody {
        uptime: state.uptime_seconds(),
        total_requests: state.total_requests.load(Ordering::Relaxed),
        blocked_items: entries.len(),
        items,
    })
}

/// GET /clear
pub async fn clear(State(state): State<SharedState>) -> Json<ClearBody> {
    state.hit();
    let mut entries = state.entries.write().await;
    let removed_count = entries.len();
    entries.clear();
    info!(removed_count, "Cleared limit entries");
    Json(ClearBody {
        status: "cleared",
        removed_count,
    })
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: "Unknown endpoint",
        }),
    )
}

// ---------------------------------------------------------------------------
// Router and server
// ---------------------------------------------------------------------------

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/report", get(report))
        .route("/blocked", get(report))
        .route("/list", get(list))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/clear", get(clear))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(addr: SocketAddr, state: SharedState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind coordinator port {addr}"))?;
    info!(%addr, "Coordinator listening");
    info!("Endpoints: /report, /list, /health, /stats, /clear");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Coordinator server error")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> (Arc<ManualClock>, SharedState) {
        let clock = Arc::new(ManualClock::at_epoch(1_700_000_000));
        let state = Arc::new(CoordinatorState::new(clock.clone()));
        (clock, state)
    }

    async fn get_json(state: &SharedState, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = build_router(state.clone())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_report_and_list() {
        let (clock, state) = test_state();
        let (status, json) = get_json(&state, "/report?item=Maple%20logs&account=Bot1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "recorded");

        clock.advance_secs(90);
        let (_, json) = get_json(&state, "/list").await;
        let blocked = json["blocked"].as_array().unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0]["item"], "Maple logs");
        assert_eq!(blocked[0]["account"], "Bot1");
        assert_eq!(blocked[0]["age"], 90);
    }

    #[tokio::test]
    async fn test_missing_params_is_bad_request() {
        let (_, state) = test_state();
        let (status, json) = get_json(&state, "/report?item=Maple%20logs").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("Missing"));

        let (status, _) = get_json(&state, "/report").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get_json(&state, "/report?item=&account=Bot1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_latest_report_for_item_wins() {
        let (clock, state) = test_state();
        get_json(&state, "/report?item=Feather&account=Bot1").await;
        clock.advance_secs(600);
        get_json(&state, "/report?item=feather&account=bot1").await;
        get_json(&state, "/report?item=Feather&account=Bot2").await;

        let (_, json) = get_json(&state, "/list").await;
        let blocked = json["blocked"].as_array().unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0]["account"], "Bot2");
        assert_eq!(blocked[0]["age"], 0);
    }

    #[tokio::test]
    async fn test_list_purges_expired() {
        let (clock, state) = test_state();
        get_json(&state, "/report?item=Feather&account=Bot1").await;
        clock.advance_secs(SERVER_TTL_SECS);
        let (_, json) = get_json(&state, "/list").await;
        assert_eq!(json["blocked"].as_array().unwrap().len(), 1);

        clock.advance_secs(1);
        let (_, json) = get_json(&state, "/list").await;
        assert!(json["blocked"].as_array().unwrap().is_empty());
        let (_, json) = get_json(&state, "/health").await;
        assert_eq!(json["blockedCount"], 0);
    }

    #[tokio::test]
    async fn test_health_and_stats() {
        let (clock, state) = test_state();
        get_json(&state, "/report?item=Coal&account=Bot1").await;
        clock.advance_secs(42);

        let (status, json) = get_json(&state, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["blockedCount"], 1);
        assert_eq!(json["uptimeSeconds"], 42);

        let (_, json) = get_json(&state, "/stats").await;
        assert_eq!(json["uptime"], 42);
        assert_eq!(json["totalRequests"], 3);
        assert_eq!(json["blockedItems"], 1);
        assert_eq!(json["items"][0]["ageSeconds"], 42);
    }

    #[tokio::test]
    async fn test_clear() {
        let (_, state) = test_state();
        get_json(&state, "/report?item=Coal&account=Bot1").await;
        get_json(&state, "/report?item=Iron&account=Bot2").await;
        let (_, json) = get_json(&state, "/clear").await;
        assert_eq!(json["status"], "cleared");
        assert_eq!(json["removedCount"], 2);
        let (_, json) = get_json(&state, "/list").await;
        assert!(json["blocked"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_endpoint() {
        let (_, state) = test_state();
        let (status, json) = get_json(&state, "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "Unknown endpoint");
    }
}
