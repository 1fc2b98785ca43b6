//! Fleet configuration
//!
//! A fleet file is a JSON document listing the handlers to supervise plus
//! supervisor tuning knobs. Handler configs are immutable once handed to the
//! supervisor; permanently removing a handler discards its config.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CoordinatorError, CoordinatorResult};
use shared::HandlerId;

/// Identity and launch parameters for one worker process
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandlerConfig {
    pub handler_id: HandlerId,

    /// Executable to launch
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Endpoint the worker answers request/reply calls on
    pub endpoint: SocketAddr,

    #[serde(default = "default_auto_restart")]
    pub auto_restart: bool,

    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    #[serde(default = "default_restart_backoff_ms")]
    pub restart_backoff_ms: u64,

    /// Implementation-specific parameters, passed to the child process as
    /// environment variables
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl HandlerConfig {
    pub fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }
}

fn default_auto_restart() -> bool {
    true
}

fn default_max_restarts() -> u32 {
    3
}

fn default_restart_backoff_ms() -> u64 {
    1000
}

/// Supervisor and client tuning knobs; every field has a default
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    /// Graceful-stop budget per unit before force-kill
    pub stop_timeout_ms: u64,

    /// How long to wait for a freshly launched unit to accept connections
    pub readiness_grace_ms: u64,

    /// How many units start/stop in parallel
    pub start_concurrency: usize,

    /// Health facade sweep interval
    pub health_interval_ms: u64,

    /// Per-unit liveness check bound
    pub health_check_timeout_ms: u64,

    /// Default RPC call bound
    pub call_timeout_ms: u64,

    /// Session establishment bound
    pub connect_timeout_ms: u64,

    /// Durable process record file
    pub state_file: PathBuf,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            stop_timeout_ms: 5000,
            readiness_grace_ms: 3000,
            start_concurrency: 4,
            health_interval_ms: 5000,
            health_check_timeout_ms: 1000,
            call_timeout_ms: 5000,
            connect_timeout_ms: 2000,
            state_file: PathBuf::from("state/processes.json"),
        }
    }
}

impl SupervisorSettings {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn readiness_grace(&self) -> Duration {
        Duration::from_millis(self.readiness_grace_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }
}

/// Timeouts applied to every RPC client the registry creates
#[derive(Clone, Copy, Debug)]
pub struct ClientSettings {
    pub call_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        SupervisorSettings::default().client_settings()
    }
}

/// Top-level fleet file: handlers plus tuning
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FleetConfig {
    pub handlers: Vec<HandlerConfig>,

    #[serde(default)]
    pub settings: SupervisorSettings,
}

impl FleetConfig {
    pub fn load(path: impl AsRef<Path>) -> CoordinatorResult<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            CoordinatorError::config(format!("Failed to read fleet file {}: {e}", path.display()))
        })?;
        let config: FleetConfig = serde_json::from_str(&data).map_err(|e| {
            CoordinatorError::config(format!("Invalid fleet file {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CoordinatorResult<()> {
        let mut ids = HashSet::new();
        let mut endpoints = HashSet::new();
        for handler in &self.handlers {
            if !ids.insert(handler.handler_id.clone()) {
                return Err(CoordinatorError::config(format!(
                    "Duplicate handler id in fleet file: {}",
                    handler.handler_id
                )));
            }
            if !endpoints.insert(handler.endpoint) {
                return Err(CoordinatorError::config(format!(
                    "Duplicate endpoint in fleet file: {}",
                    handler.endpoint
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler_json(id: &str, port: u16) -> String {
        format!(
            r#"{{"handler_id": "{id}", "command": "handler", "endpoint": "127.0.0.1:{port}"}}"#
        )
    }

    #[test]
    fn test_minimal_fleet_file_uses_defaults() {
        let json = format!(r#"{{"handlers": [{}]}}"#, handler_json("w1", 7001));
        let config: FleetConfig = serde_json::from_str(&json).unwrap();
        config.validate().unwrap();

        let handler = &config.handlers[0];
        assert!(handler.auto_restart);
        assert_eq!(handler.max_restarts, 3);
        assert_eq!(handler.restart_backoff(), Duration::from_millis(1000));
        assert!(handler.extra.is_empty());
        assert_eq!(config.settings.stop_timeout(), Duration::from_millis(5000));
    }

    #[test]
    fn test_duplicate_handler_id_rejected() {
        let json = format!(
            r#"{{"handlers": [{}, {}]}}"#,
            handler_json("w1", 7001),
            handler_json("w1", 7002)
        );
        let config: FleetConfig = serde_json::from_str(&json).unwrap();
        let result = config.validate();
        assert!(matches!(result, Err(CoordinatorError::Config { .. })));
    }

    #[test]
    fn test_duplicate_endpoint_rejected() {
        let json = format!(
            r#"{{"handlers": [{}, {}]}}"#,
            handler_json("w1", 7001),
            handler_json("w2", 7001)
        );
        let config: FleetConfig = serde_json::from_str(&json).unwrap();
        assert!(config.validate().is_err());
    }
}
