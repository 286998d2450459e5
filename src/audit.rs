//! Audit trail of store events
//!
//! Writes JSON lines to `~/.local/state/lifecache/audit.log` (or the
//! configured path). Off by default.

use crate::config::{schema::Config, ConfigManager};
use crate::store::{CacheStore, StoreEvent};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// File-based audit logger that appends JSON lines
pub struct AuditLog {
    enabled: bool,
    path: PathBuf,
}

impl AuditLog {
    /// Create a new audit logger from config
    pub fn new(config: &Config) -> Self {
        Self {
            enabled: config.general.audit_log,
            path: config
                .general
                .audit_path
                .clone()
                .unwrap_or_else(ConfigManager::audit_log_path),
        }
    }

    pub fn with_path(path: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            enabled,
            path: path.into(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one store event.
    ///
    /// IO failures are logged and dropped; the cache keeps running.
    pub async fn record(&self, event: &StoreEvent) {
        if !self.enabled {
            return;
        }

        let entry = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "event": event.name(),
            "key": event.key(),
            "entity": event.entity_id,
            "data": event.event.details(),
        });

        let mut line = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize audit event: {}", e);
                return;
            }
        };
        line.push('\n');

        if let Err(e) = self.append(&line).await {
            warn!("Failed to write audit log: {}", e);
        }
    }

    /// Record every event of `store` until the store is dropped.
    ///
    /// Returns `None` when auditing is disabled.
    pub fn spawn(self, store: &CacheStore) -> Option<JoinHandle<()>> {
        if !self.enabled {
            return None;
        }

        let mut rx = store.subscribe();
        Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => self.record(&event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Audit log lagged behind the store");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Store closed, audit log finished");
                        break;
                    }
                }
            }
        }))
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
