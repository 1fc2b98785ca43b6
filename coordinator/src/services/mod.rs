//! Service implementations
//!
//! Production implementations of the supervision and RPC resilience core:
//! the transport session, the RPC client, the handler registry, the
//! process-based supervisor with its durable record store, and the
//! health/metrics facade.

pub mod health;
pub mod process_supervisor;
pub mod registry;
pub mod rpc_client;
pub mod state_store;
pub mod transport;

#[cfg(test)]
mod tests;

// Re-export all service implementations
pub use health::{HandlerHealth, HealthMonitor, HealthReport};
pub use process_supervisor::ProcessSupervisor;
pub use registry::HandlerRegistry;
pub use rpc_client::RpcClient;
pub use state_store::{StateStore, StoredProcess};
pub use transport::TransportSession;
