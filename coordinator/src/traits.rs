//! Trait definitions with mockall annotations for testing
//!
//! The supervisor contract is the single interface the coordinator is written
//! against; any supervision strategy (OS processes today, containers as a
//! future variant) implements this operation set.

use std::collections::HashMap;
use std::time::Duration;

use crate::config::HandlerConfig;
use crate::error::CoordinatorResult;
use crate::state::{ProcessRecord, SupervisorMetrics};
use shared::HandlerId;

/// Lifecycle contract for a set of named supervised units
///
/// Every operation completes within a bounded time even when a unit is
/// unresponsive; a stuck unit is force-terminated rather than left to block
/// a `stop` call.
#[mockall::automock]
#[async_trait::async_trait]
pub trait Supervisor: Send + Sync {
    /// Start all configured units; already-running units are left untouched
    async fn start(&self) -> CoordinatorResult<()>;

    /// Request graceful stop of all units, force-terminating any unit still
    /// alive after `timeout`
    async fn stop(&self, timeout: Duration) -> CoordinatorResult<()>;

    /// `stop(timeout)` followed by `start()`
    async fn restart(&self, timeout: Duration) -> CoordinatorResult<()>;

    /// Snapshot of every managed unit's record
    async fn status(&self) -> Vec<ProcessRecord>;

    /// Add and start one new unit at runtime
    ///
    /// Fails with a conflict error when the handler id already exists; the
    /// existing unit is left untouched in that case.
    async fn add_handler(&self, config: HandlerConfig) -> CoordinatorResult<()>;

    /// Stop and permanently forget one unit; idempotent on an already-removed id
    async fn remove_handler(&self, id: &HandlerId) -> CoordinatorResult<()>;

    /// Targeted restart of one unit without affecting others
    async fn restart_handler(&self, id: &HandlerId) -> CoordinatorResult<()>;

    /// Liveness per unit as observed via a process-alive check
    async fn health_check(&self) -> HashMap<HandlerId, bool>;

    /// Aggregate counts across all units
    async fn get_metrics(&self) -> SupervisorMetrics;
}
