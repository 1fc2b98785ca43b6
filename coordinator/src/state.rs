//! Runtime state of supervised units
//!
//! `ProcessRecord` is owned exclusively by the supervisor; callers only ever
//! see cloned snapshots returned from `status()`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use shared::HandlerId;

/// Lifecycle state of one supervised unit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Crashed,
    Restarting,
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UnitStatus::Starting => "starting",
            UnitStatus::Running => "running",
            UnitStatus::Stopping => "stopping",
            UnitStatus::Stopped => "stopped",
            UnitStatus::Crashed => "crashed",
            UnitStatus::Restarting => "restarting",
        };
        write!(f, "{label}")
    }
}

/// Snapshot of one supervised unit's runtime state
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub handler_id: HandlerId,
    pub pid: Option<u32>,
    pub status: UnitStatus,
    pub restart_count: u32,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl ProcessRecord {
    pub fn new(handler_id: HandlerId) -> Self {
        Self {
            handler_id,
            pid: None,
            status: UnitStatus::Stopped,
            restart_count: 0,
            last_error: None,
            started_at: None,
        }
    }
}

/// Aggregate counts across all supervised units
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorMetrics {
    pub total_units: usize,
    pub healthy_units: usize,
    pub total_restarts: u64,
}
