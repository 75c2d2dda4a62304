//! Fleet coordination.
//!
//! Agents share an advisory `{item -> (owner, expiry)}` set so a sibling can
//! take over an item another agent has exhausted. The set travels through a
//! pluggable [`CoordinationTransport`]: a networked service (`http`), a
//! shared document (`file`), or nothing at all ([`DisabledTransport`]).
//!
//! Entries are hints, not locks. Every failure degrades to "no known
//! opportunities" and never to "everything blocked".

pub mod backoff;
pub mod file;
pub mod http;
pub mod server;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::types::{item_key, CoordinationEntry};

/// Lifetime of a reported entry.
pub const ENTRY_TTL_SECS: i64 = crate::limits::LIMIT_WINDOW_SECS;

#[derive(Debug, Error)]
pub enum CoordError {
    #[error("coordinator request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("coordination document I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("coordination payload malformed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("coordinator unavailable: {0}")]
    Unavailable(String),
}

/// Reachability snapshot of a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub available: bool,
    /// Entries the backend currently holds, if it reports that.
    pub entries: Option<usize>,
    pub detail: String,
}

impl HealthStatus {
    pub fn down(detail: impl Into<String>) -> Self {
        Self {
            available: false,
            entries: None,
            detail: detail.into(),
        }
    }
}

/// A backend that stores and replicates coordination entries.
#[async_trait]
pub trait CoordinationTransport: Send + Sync {
    /// Upsert an entry for `(item, owner)` with the standard TTL.
    async fn report(&self, item: &str, owner: &str) -> Result<(), CoordError>;

    /// Every live entry, including the caller's own. An unavailable
    /// transport returns `CoordError::Unavailable` without touching the
    /// backend unless a re-probe is due.
    async fn list_live(&self) -> Result<Vec<CoordinationEntry>, CoordError>;

    /// Probe the backend and return its state.
    async fn health(&self) -> HealthStatus;

    /// Last known reachability, without any I/O.
    fn is_available(&self) -> bool;

    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Disabled transport
// ---------------------------------------------------------------------------

/// Single-agent operation: reports go nowhere, nothing is ever blocked.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledTransport;

#[async_trait]
impl CoordinationTransport for DisabledTransport {
    async fn report(&self, _item: &str, _owner: &str) -> Result<(), CoordError> {
        Ok(())
    }

    async fn list_live(&self) -> Result<Vec<CoordinationEntry>, CoordError> {
        Ok(Vec::new())
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus::down("coordination disabled")
    }

    fn is_available(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "disabled"
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// The agent-facing contract, bound to one agent identity.
#[derive(Clone)]
pub struct Coordinator {
    agent_id: String,
    transport: Arc<dyn CoordinationTransport>,
    clock: Arc<dyn Clock>,
}

impl Coordinator {
    pub fn new(
        agent_id: impl Into<String>,
        transport: Arc<dyn CoordinationTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            transport,
            clock,
        }
    }

    pub fn disabled(agent_id: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self::new(agent_id, Arc::new(DisabledTransport), clock)
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    /// Broadcast that this agent exhausted `item`. Failures are logged and
    /// dropped; reporting again later is always safe.
    pub async fn report(&self, item: &str) {
        match self.transport.report(item, &self.agent_id).await {
            Ok(()) => info!(
                item,
                agent = %self.agent_id,
                transport = self.transport.name(),
                "Reported capacity exhaustion to fleet"
            ),
            Err(e) => warn!(item, error = %e, "Coordinator report dropped"),
        }
    }

    /// Case-folded items that *other* agents currently have blocked.
    ///
    /// Empty when the transport is unavailable or the lookup fails.
    pub async fn blocked_by_others(&self) -> HashSet<String> {
        let entries = match self.transport.list_live().await {
            Ok(entries) => entries,
            Err(CoordError::Unavailable(reason)) => {
                debug!(transport = self.transport.name(), reason = %reason, "No takeover hints");
                return HashSet::new();
            }
            Err(e) => {
                warn!(error = %e, "Coordinator lookup failed, treating as no information");
                return HashSet::new();
            }
        };

        let now = self.clock.now();
        entries
            .iter()
            .filter(|e| e.is_live(now) && !e.is_owned_by(&self.agent_id))
            .map(|e| item_key(&e.item))
            .collect()
    }

    pub fn is_available(&self) -> bool {
        self.transport.is_available()
    }

    pub async fn health(&self) -> HealthStatus {
        self.transport.health().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
