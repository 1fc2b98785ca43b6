//! Health/metrics facade
//!
//! Periodically polls every managed unit and aggregates liveness and restart
//! counters into a plain snapshot for the coordinator (or an HTTP health
//! endpoint) to serialize. Each unit is probed with its own bounded wait so
//! one unresponsive handler cannot delay reporting on the others.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

use crate::services::registry::HandlerRegistry;
use crate::state::{SupervisorMetrics, UnitStatus};
use crate::traits::Supervisor;
use shared::{process_debug, HandlerId, ProcessId};

/// Aggregated view of one handler
#[derive(Clone, Debug, Serialize)]
pub struct HandlerHealth {
    pub alive: bool,
    pub status: UnitStatus,
    pub restart_count: u32,
    pub last_error: Option<String>,
}

/// One aggregated sweep over the fleet
#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    pub generated_at: DateTime<Utc>,
    pub metrics: SupervisorMetrics,
    pub handlers: HashMap<HandlerId, HandlerHealth>,
}

pub struct HealthMonitor<S: Supervisor> {
    supervisor: Arc<S>,
    registry: Arc<HandlerRegistry>,
    interval: Duration,
    check_timeout: Duration,
    latest: RwLock<Option<HealthReport>>,
}

impl<S: Supervisor> HealthMonitor<S> {
    pub fn new(
        supervisor: Arc<S>,
        registry: Arc<HandlerRegistry>,
        interval: Duration,
        check_timeout: Duration,
    ) -> Self {
        Self {
            supervisor,
            registry,
            interval,
            check_timeout,
            latest: RwLock::new(None),
        }
    }

    /// Last aggregated report, if a sweep has completed yet
    pub async fn snapshot(&self) -> Option<HealthReport> {
        self.latest.read().await.clone()
    }

    /// Poll every unit once and aggregate
    ///
    /// A unit counts as alive when it answers an RPC ping within the check
    /// timeout, or failing that, when its process is alive.
    pub async fn sweep(&self) -> HealthReport {
        let records = self.supervisor.status().await;
        let process_alive = self.supervisor.health_check().await;

        // Independent bounded ping per unit, aggregated after
        let checks = records.iter().map(|record| {
            let id = record.handler_id.clone();
            async move {
                let responsive = match self.registry.get_client(&id).await {
                    Ok(client) => {
                        tokio::time::timeout(self.check_timeout, client.ping(self.check_timeout))
                            .await
                            .map(|r| r.is_ok())
                            .unwrap_or(false)
                    }
                    Err(_) => false,
                };
                (id, responsive)
            }
        });
        let ping_results: HashMap<HandlerId, bool> = join_all(checks).await.into_iter().collect();

        let handlers: HashMap<HandlerId, HandlerHealth> = records
            .into_iter()
            .map(|record| {
                let responsive = ping_results.get(&record.handler_id).copied().unwrap_or(false);
                let proc_ok = process_alive.get(&record.handler_id).copied().unwrap_or(false);
                let health = HandlerHealth {
                    alive: responsive || proc_ok,
                    status: record.status,
                    restart_count: record.restart_count,
                    last_error: record.last_error,
                };
                (record.handler_id, health)
            })
            .collect();

        let mut metrics = self.supervisor.get_metrics().await;
        metrics.healthy_units = handlers.values().filter(|h| h.alive).count();

        let report = HealthReport {
            generated_at: Utc::now(),
            metrics,
            handlers,
        };

        *self.latest.write().await = Some(report.clone());
        report
    }

    /// Run sweeps on the configured interval until a shutdown request arrives
    pub async fn run(&self, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.sweep().await;
                    process_debug!(
                        ProcessId::current(),
                        "Health sweep: {}/{} handlers healthy, {} restarts total",
                        report.metrics.healthy_units,
                        report.metrics.total_units,
                        report.metrics.total_restarts
                    );
                }
                _ = shutdown.recv() => break,
            }
        }
    }
}
