//! Networked coordination transport.
//!
//! Talks to the `coordinator` binary over plain GET requests:
//! `/report?item=&account=`, `/list` and `/health`. Repeated failures open
//! a simple breaker: the transport reports itself unavailable and only
//! re-probes `/health` on a slower cadence.

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use rand::rngs::StdRng;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::server::SERVER_TTL_SECS;
use super::{CoordError, CoordinationTransport, HealthStatus};
use crate::clock::Clock;
use crate::types::CoordinationEntry;

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub base_url: String,
    pub timeout: Duration,
    pub report_attempts: u32,
    /// Consecutive failed requests before the transport marks itself down.
    pub failure_threshold: u32,
    pub reprobe_interval: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8888".to_string(),
            timeout: Duration::from_secs(5),
            report_attempts: 3,
            failure_threshold: 3,
            reprobe_interval: Duration::from_secs(60),
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ListResponse {
    blocked: Vec<ListedEntry>,
}

#[derive(Debug, Deserialize)]
struct ListedEntry {
    item: String,
    account: String,
    /// Seconds since the entry was reported.
    age: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    blocked_count: usize,
    uptime_seconds: u64,
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

pub struct HttpTransport {
    client: reqwest::Client,
    settings: HttpSettings,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
    consecutive_failures: AtomicU32,
    last_probe: Mutex<Option<Instant>>,
    backoff: tokio::sync::Mutex<Backoff>,
}

impl HttpTransport {
    pub fn new(settings: HttpSettings, clock: Arc<dyn Clock>, rng: StdRng) -> Result<Self, CoordError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("flipfleet/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let backoff = Backoff::new(settings.backoff_initial, settings.backoff_max, rng);
        Ok(Self {
            client,
            settings,
            clock,
            available: AtomicBool::new(true),
            consecutive_failures: AtomicU32::new(0),
            last_probe: Mutex::new(None),
            backoff: tokio::sync::Mutex::new(backoff),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        if !self.available.swap(true, Ordering::Relaxed) {
            info!(url = %self.settings.base_url, "Coordinator reachable again");
        }
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.settings.failure_threshold && self.available.swap(false, Ordering::Relaxed) {
            *self.last_probe.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
            warn!(
                url = %self.settings.base_url,
                failures,
                reprobe_secs = self.settings.reprobe_interval.as_secs(),
                "Coordinator marked unavailable"
            );
        }
    }

    fn reprobe_due(&self) -> bool {
        match *self.last_probe.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(at) => at.elapsed() >= self.settings.reprobe_interval,
            None => true,
        }
    }

    /// True if requests may be sent, re-probing health when one is due.
    async fn ensure_reachable(&self) -> bool {
        if self.available.load(Ordering::Relaxed) {
            return true;
        }
        if !self.reprobe_due() {
            return false;
        }
        self.health().await.available
    }

    async fn send_report(&self, item: &str, owner: &str) -> Result<(), CoordError> {
        self.client
            .get(self.url("/report"))
            .query(&[("item", item), ("account", owner)])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn fetch_list(&self) -> Result<ListResponse, CoordError> {
        let resp = self
            .client
            .get(self.url("/list"))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json::<ListResponse>().await?)
    }
}

#[async_trait]
impl CoordinationTransport for HttpTransport {
    async fn report(&self, item: &str, owner: &str) -> Result<(), CoordError> {
        if !self.ensure_reachable().await {
            return Err(CoordError::Unavailable(format!(
                "{} marked down, report skipped",
                self.settings.base_url
            )));
        }

        let attempts = self.settings.report_attempts.max(1);
        let mut backoff = self.backoff.lock().await;
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.send_report(item, owner).await {
                Ok(()) => {
                    backoff.reset();
                    self.record_success();
                    debug!(item, owner, attempt, "Coordinator report recorded");
                    return Ok(());
                }
                Err(e) => {
                    warn!(item, attempt, attempts, error = %e, "Coordinator report failed");
                    self.record_failure();
                    last_error = Some(e);
                    if attempt < attempts && self.available.load(Ordering::Relaxed) {
                        backoff.increase();
                        tokio::time::sleep(backoff.next_delay()).await;
                    } else {
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| CoordError::Unavailable("no attempt made".into())))
    }

    async fn list_live(&self) -> Result<Vec<CoordinationEntry>, CoordError> {
        if !self.ensure_reachable().await {
            return Err(CoordError::Unavailable(format!("{} marked down", self.settings.base_url)));
        }

        match self.fetch_list().await {
            Ok(list) => {
                self.record_success();
                self.backoff.lock().await.reset();
                let now = self.clock.now();
                Ok(list
                    .blocked
                    .into_iter()
                    .map(|e| {
                        let reported_at = now - ChronoDuration::seconds(e.age.max(0));
                        CoordinationEntry {
                            item: e.item,
                            owner: e.account,
                            expires_at: reported_at + ChronoDuration::seconds(SERVER_TTL_SECS),
                            reported_at,
                        }
                    })
                    .collect())
            }
            Err(e) => {
                self.record_failure();
                self.backoff.lock().await.increase();
                Err(e)
            }
        }
    }

    async fn health(&self) -> HealthStatus {
        *self.last_probe.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());

        let result = async {
            let resp = self
                .client
                .get(self.url("/health"))
                .send()
                .await?
                .error_for_status()?;
            Ok::<_, CoordError>(resp.json::<HealthResponse>().await?)
        }
        .await;

        match result {
            Ok(h) => {
                self.record_success();
                HealthStatus {
                    available: true,
                    entries: Some(h.blocked_count),
                    detail: format!("{} (up {}s)", h.status, h.uptime_seconds),
                }
            }
            Err(e) => {
                self.available.store(false, Ordering::Relaxed);
                warn!(url = %self.settings.base_url, error = %e, "Coordinator health check failed");
                HealthStatus::down(e.to_string())
            }
        }
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    fn name(&self) -> &str {
        "http"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
