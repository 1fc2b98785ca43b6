//! Core shared types and identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

static PROCESS_ID: OnceLock<ProcessId> = OnceLock::new();

/// Identity of the running process, used for log attribution
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProcessId {
    /// Coordinator process (singleton)
    Coordinator,
    /// Handler process with its logical handler id
    Handler(String),
}

impl ProcessId {
    /// Initialize the global process ID for the coordinator
    pub fn init_coordinator() -> &'static ProcessId {
        PROCESS_ID.get_or_init(|| ProcessId::Coordinator)
    }

    /// Initialize the global process ID for a handler with its logical id
    pub fn init_handler(id: impl Into<String>) -> &'static ProcessId {
        PROCESS_ID.get_or_init(|| ProcessId::Handler(id.into()))
    }

    /// Get the global process ID; defaults to coordinator when never initialized
    /// (library consumers and tests do not have to call init_*)
    pub fn current() -> &'static ProcessId {
        PROCESS_ID.get_or_init(|| ProcessId::Coordinator)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessId::Coordinator => write!(f, "coordinator"),
            ProcessId::Handler(id) => write!(f, "handler_{id}"),
        }
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        ProcessId::Coordinator
    }
}

/// Stable logical identity of a managed worker
///
/// Maps to at most one live process record and at most one live RPC client
/// at a time; the string form appears in config files, logs, and the durable
/// process store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerId(String);

impl HandlerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for HandlerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for HandlerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
