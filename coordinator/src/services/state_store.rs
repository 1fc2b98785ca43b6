//! Durable process records
//!
//! The supervisor persists the pid and start-time fingerprint of every unit
//! it launches so a later supervisor run can recognize processes from a
//! previous one and reconcile them instead of silently launching duplicates.
//! Records are kept in a single JSON file rewritten atomically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::Mutex;

use crate::error::CoordinatorResult;
use shared::{process_warn, HandlerId, ProcessId};

/// One durable entry: which pid hosts which handler, and when it started
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredProcess {
    pub handler_id: HandlerId,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

pub struct StateStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles across units
    guard: Mutex<()>,
}

impl StateStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub async fn load(&self) -> CoordinatorResult<Vec<StoredProcess>> {
        let _guard = self.guard.lock().await;
        self.read_records().await
    }

    /// Insert or replace the record for one handler
    pub async fn record(&self, entry: StoredProcess) -> CoordinatorResult<()> {
        let _guard = self.guard.lock().await;
        let mut records = self.read_records().await?;
        records.retain(|r| r.handler_id != entry.handler_id);
        records.push(entry);
        self.write_records(&records).await
    }

    /// Drop the record for one handler; a no-op when absent
    pub async fn remove(&self, id: &HandlerId) -> CoordinatorResult<()> {
        let _guard = self.guard.lock().await;
        let mut records = self.read_records().await?;
        let before = records.len();
        records.retain(|r| &r.handler_id != id);
        if records.len() == before {
            return Ok(());
        }
        self.write_records(&records).await
    }

    async fn read_records(&self) -> CoordinatorResult<Vec<StoredProcess>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&bytes) {
            Ok(records) => Ok(records),
            Err(e) => {
                // A torn or hand-edited file must not wedge supervision;
                // reconciliation starts from scratch instead
                process_warn!(
                    ProcessId::current(),
                    "Discarding unreadable process record file {}: {}",
                    self.path.display(),
                    e
                );
                Ok(Vec::new())
            }
        }
    }

    async fn write_records(&self, records: &[StoredProcess]) -> CoordinatorResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let data = serde_json::to_vec_pretty(records)?;

        // Write-then-rename keeps the record readable if we crash mid-write
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
