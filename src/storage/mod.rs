//! Persistence layer.
//!
//! JSON files for the catalog input and the per-agent limit snapshot.
//! Limit snapshots are written to a temp file and renamed into place so a
//! crash mid-write never leaves a truncated snapshot behind.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, SharedCatalog};
use crate::limits::LimitTracker;
use crate::types::CatalogRow;

/// Directory under the data dir that holds limit snapshots.
const LIMITS_DIR: &str = "limits";

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Read a JSON array of catalog rows.
pub fn load_catalog_rows(path: &Path) -> Result<Vec<CatalogRow>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog from {}", path.display()))?;
    let rows: Vec<CatalogRow> = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse catalog from {}", path.display()))?;
    debug!(path = %path.display(), rows = rows.len(), "Catalog rows read");
    Ok(rows)
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Poll `path` for modification and swap the catalog in place when it
/// changes. A file that fails to parse leaves the live catalog untouched.
pub fn spawn_catalog_reloader(path: PathBuf, shared: SharedCatalog, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_seen = modified(&path);
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let current = modified(&path);
            if current.is_none() || current == last_seen {
                continue;
            }
            last_seen = current;
            match load_catalog_rows(&path) {
                Ok(rows) => {
                    let (catalog, report) = Catalog::load_with_report(&rows);
                    info!(
                        path = %path.display(),
                        accepted = report.accepted,
                        rejected = report.rejected.len(),
                        "Catalog file changed, reloading"
                    );
                    shared.replace(catalog);
                }
                Err(e) => warn!(error = %e, "Catalog reload failed, keeping current catalog"),
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// File-system safe form of an agent id.
pub fn sanitize_agent_id(agent_id: &str) -> String {
    agent_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

pub fn limits_path(dir: &Path, agent_id: &str) -> PathBuf {
    dir.join(LIMITS_DIR)
        .join(format!("{}.json", sanitize_agent_id(agent_id)))
}

/// Persist the tracker's snapshot as `{"<item>": <unblock epoch secs>}`.
pub fn save_limits(dir: &Path, agent_id: &str, limits: &LimitTracker) -> Result<()> {
    let path = limits_path(dir, agent_id);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let snapshot = limits.snapshot();
    let json = serde_json::to_string_pretty(&snapshot).context("Failed to serialise limit snapshot")?;

    let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4()));
    std::fs::write(&tmp, &json).with_context(|| format!("Failed to write {}", tmp.display()))?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("Failed to replace {}", path.display()));
    }

    debug!(path = %path.display(), entries = snapshot.len(), "Limits saved");
    Ok(())
}

/// Restore a persisted snapshot into `limits`. A missing or unreadable
/// file leaves the tracker empty. Returns the number of active blocks.
pub fn load_limits(dir: &Path, agent_id: &str, limits: &LimitTracker) -> usize {
    let path = limits_path(dir, agent_id);
    if !path.exists() {
        info!(path = %path.display(), "No saved limits found, starting fresh");
        return 0;
    }

    let parsed = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))
        .and_then(|json| {
            serde_json::from_str::<HashMap<String, i64>>(&json)
                .with_context(|| format!("Failed to parse {}", path.display()))
        });

    match parsed {
        Ok(entries) => {
            for (item, until) in &entries {
                limits.restore(item, *until);
            }
            let active = limits.active_count();
            info!(path = %path.display(), entries = entries.len(), active, "Limits restored");
            active
        }
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable limit snapshot");
            0
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
