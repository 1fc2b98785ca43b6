//! Coordinator library for the distributed job-execution fabric
//!
//! Provides the process supervision and RPC resilience core: a supervisor
//! that starts, monitors, and gracefully stops handler processes, and a
//! registry of self-healing request/reply clients for reaching them.

pub mod config;
pub mod error;
pub mod services;
pub mod state;
pub mod traits;

// Re-export commonly used types
pub use config::{ClientSettings, FleetConfig, HandlerConfig, SupervisorSettings};
pub use error::{CoordinatorError, CoordinatorResult};
pub use services::{HandlerRegistry, HealthMonitor, ProcessSupervisor, RpcClient, StateStore, TransportSession};
pub use state::{ProcessRecord, SupervisorMetrics, UnitStatus};
pub use traits::Supervisor;
