//! Shared-document coordination transport.
//!
//! The entry set lives in one JSON document on storage every agent can
//! reach (a shared drive, an NFS mount):
//!
//! ```json
//! {"limits":[{"item":"Maple logs","account":"bot1","expiresAt":1729278000000,"reportedAt":1729263600000}]}
//! ```
//!
//! Timestamps are epoch milliseconds. Every write goes to a uniquely named
//! temp file next to the document and is renamed over it, so readers never
//! see a partial document. Reads are cached briefly.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

use super::{CoordError, CoordinationTransport, HealthStatus, ENTRY_TTL_SECS};
use crate::clock::Clock;
use crate::types::CoordinationEntry;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CoordinationDocument {
    #[serde(default)]
    limits: Vec<DocumentEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentEntry {
    item: String,
    account: String,
    expires_at: i64,
    reported_at: i64,
}

impl DocumentEntry {
    fn to_entry(&self) -> Option<CoordinationEntry> {
        Some(CoordinationEntry {
            item: self.item.clone(),
            owner: self.account.clone(),
            expires_at: from_millis(self.expires_at)?,
            reported_at: from_millis(self.reported_at)?,
        })
    }
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

struct CachedRead {
    read_at: DateTime<Utc>,
    document: CoordinationDocument,
}

pub struct SharedDocumentTransport {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    cache_ttl: Duration,
    cache: Mutex<Option<CachedRead>>,
    write_lock: tokio::sync::Mutex<()>,
    available: AtomicBool,
}

impl SharedDocumentTransport {
    pub fn new(path: impl Into<PathBuf>, clock: Arc<dyn Clock>, cache_ttl: Duration) -> Self {
        Self {
            path: path.into(),
            clock,
            cache_ttl,
            cache: Mutex::new(None),
            write_lock: tokio::sync::Mutex::new(()),
            available: AtomicBool::new(true),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop the cached read so the next lookup goes to storage.
    pub fn invalidate_cache(&self) {
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn cached(&self) -> Option<CoordinationDocument> {
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(self.cache_ttl).unwrap_or_else(|_| chrono::Duration::zero());
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|c| now - c.read_at < ttl)
            .map(|c| c.document.clone())
    }

    fn store_cache(&self, document: CoordinationDocument) {
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = Some(CachedRead {
            read_at: self.clock.now(),
            document,
        });
    }

    fn track<T>(&self, result: Result<T, CoordError>) -> Result<T, CoordError> {
        match &result {
            Ok(_) => self.available.store(true, Ordering::Relaxed),
            Err(CoordError::Io(_)) => self.available.store(false, Ordering::Relaxed),
            Err(_) => {}
        }
        result
    }

    /// Read the document from storage. A missing document is empty.
    async fn read_document(&self) -> Result<CoordinationDocument, CoordError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(CoordinationDocument::default()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(CoordinationDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_document(&self, document: &CoordinationDocument) -> Result<(), CoordError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "coordination.json".to_string());
        let tmp = self
            .path
            .with_file_name(format!("{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));

        let json = serde_json::to_vec_pretty(document)?;
        if let Err(e) = tokio::fs::write(&tmp, &json).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn upsert(&self, item: &str, owner: &str) -> Result<(), CoordError> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.read_document().await?;
        let now_ms = self.clock.epoch_millis();

        let before = document.limits.len();
        document
            .limits
            .retain(|e| e.expires_at > now_ms && !e.item.eq_ignore_ascii_case(item));
        document.limits.push(DocumentEntry {
            item: item.to_string(),
            account: owner.to_string(),
            expires_at: now_ms + ENTRY_TTL_SECS * 1_000,
            reported_at: now_ms,
        });
        debug!(
            path = %self.path.display(),
            dropped = before + 1 - document.limits.len(),
            entries = document.limits.len(),
            "Writing coordination document"
        );

        self.write_document(&document).await?;
        self.store_cache(document);
        Ok(())
    }
}

#[async_trait]
impl CoordinationTransport for SharedDocumentTransport {
    async fn report(&self, item: &str, owner: &str) -> Result<(), CoordError> {
        let result = self.upsert(item, owner).await;
        self.track(result)
    }

    async fn list_live(&self) -> Result<Vec<CoordinationEntry>, CoordError> {
        let document = match self.cached() {
            Some(document) => document,
            None => {
                let read = self.read_document().await;
                let document = self.track(read)?;
                self.store_cache(document.clone());
                document
            }
        };

        let now = self.clock.now();
        Ok(document
            .limits
            .iter()
            .filter_map(DocumentEntry::to_entry)
            .filter(|e| e.is_live(now))
            .collect())
    }

    async fn health(&self) -> HealthStatus {
        let read = self.read_document().await;
        match self.track(read) {
            Ok(document) => {
                let now_ms = self.clock.epoch_millis();
                let live = document.limits.iter().filter(|e| e.expires_at > now_ms).count();
                HealthStatus {
                    available: true,
                    entries: Some(live),
                    detail: self.path.display().to_string(),
                }
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Coordination document unreadable");
                HealthStatus::down(e.to_string())
            }
        }
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    fn name(&self) -> &str {
        "shared-document"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
