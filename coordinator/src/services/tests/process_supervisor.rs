//! Tests for the process-based supervisor
//!
//! These spawn real short-lived shell processes; unix only.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

use super::common::dead_endpoint;
use crate::config::{HandlerConfig, SupervisorSettings};
use crate::error::CoordinatorError;
use crate::services::process_supervisor::ProcessSupervisor;
use crate::services::registry::HandlerRegistry;
use crate::services::state_store::{StateStore, StoredProcess};
use crate::state::UnitStatus;
use crate::traits::Supervisor;
use shared::HandlerId;

fn sh_config(
    id: &str,
    script: &str,
    endpoint: SocketAddr,
    auto_restart: bool,
    max_restarts: u32,
) -> HandlerConfig {
    HandlerConfig {
        handler_id: HandlerId::new(id),
        command: "/bin/sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        endpoint,
        auto_restart,
        max_restarts,
        restart_backoff_ms: 10,
        extra: HashMap::new(),
    }
}

fn test_settings(dir: &TempDir) -> SupervisorSettings {
    SupervisorSettings {
        stop_timeout_ms: 500,
        readiness_grace_ms: 150,
        start_concurrency: 4,
        health_interval_ms: 100,
        health_check_timeout_ms: 100,
        call_timeout_ms: 200,
        connect_timeout_ms: 200,
        state_file: dir.path().join("processes.json"),
    }
}

async fn supervisor_with(configs: Vec<HandlerConfig>, dir: &TempDir) -> Arc<ProcessSupervisor> {
    let settings = test_settings(dir);
    let registry = Arc::new(HandlerRegistry::new(settings.client_settings()));
    let store = StateStore::new(settings.state_file.clone());
    Arc::new(
        ProcessSupervisor::new(configs, store, registry, settings)
            .await
            .unwrap(),
    )
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let endpoint = dead_endpoint().await;
    let supervisor =
        supervisor_with(vec![sh_config("w1", "sleep 30", endpoint, false, 0)], &dir).await;

    supervisor.start().await.unwrap();
    let records = supervisor.status().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, UnitStatus::Running);
    let pid = records[0].pid.expect("pid recorded");

    // Starting again leaves the running unit untouched
    supervisor.start().await.unwrap();
    assert_eq!(supervisor.status().await[0].pid, Some(pid));

    supervisor.stop(Duration::from_millis(500)).await.unwrap();
    assert_eq!(supervisor.status().await[0].status, UnitStatus::Stopped);
}

/// stop() must return within timeout plus a small epsilon even when the
/// unit ignores the graceful signal
#[tokio::test]
async fn test_stop_is_bounded_for_a_stuck_unit() {
    let dir = TempDir::new().unwrap();
    let endpoint = dead_endpoint().await;
    let supervisor = supervisor_with(
        vec![sh_config("stuck", "trap '' TERM; sleep 30", endpoint, false, 0)],
        &dir,
    )
    .await;

    supervisor.start().await.unwrap();

    let begin = Instant::now();
    supervisor.stop(Duration::from_millis(300)).await.unwrap();
    let elapsed = begin.elapsed();

    assert!(elapsed < Duration::from_secs(2), "stop took {elapsed:?}");
    assert_eq!(supervisor.status().await[0].status, UnitStatus::Stopped);
}

#[tokio::test]
async fn test_add_handler_with_duplicate_id_conflicts() {
    let dir = TempDir::new().unwrap();
    let endpoint = dead_endpoint().await;
    let supervisor =
        supervisor_with(vec![sh_config("w1", "sleep 30", endpoint, false, 0)], &dir).await;

    supervisor.start().await.unwrap();
    let pid = supervisor.status().await[0].pid;

    let duplicate = sh_config("w1", "sleep 5", dead_endpoint().await, false, 0);
    let result = supervisor.add_handler(duplicate).await;
    assert!(matches!(result, Err(CoordinatorError::ConflictingId { .. })));

    // The existing unit is untouched
    let records = supervisor.status().await;
    assert_eq!(records[0].status, UnitStatus::Running);
    assert_eq!(records[0].pid, pid);

    supervisor.stop(Duration::from_millis(500)).await.unwrap();
}

#[tokio::test]
async fn test_remove_handler_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let endpoint = dead_endpoint().await;
    let supervisor =
        supervisor_with(vec![sh_config("w1", "sleep 30", endpoint, false, 0)], &dir).await;
    let id = HandlerId::new("w1");

    supervisor.start().await.unwrap();

    supervisor.remove_handler(&id).await.unwrap();
    supervisor.remove_handler(&id).await.unwrap();

    assert!(supervisor.status().await.is_empty());
}

/// A unit that crashes on every start reaches terminal crashed after exactly
/// max_restarts attempts; no further attempt is made
#[tokio::test]
async fn test_restart_budget_is_exhausted_after_max_attempts() {
    let dir = TempDir::new().unwrap();
    let endpoint = dead_endpoint().await;
    let supervisor =
        supervisor_with(vec![sh_config("flappy", "exit 7", endpoint, true, 3)], &dir).await;

    supervisor.start().await.unwrap();
    for _ in 0..10 {
        supervisor.poll_units().await;
    }

    let records = supervisor.status().await;
    let record = &records[0];
    assert_eq!(record.status, UnitStatus::Crashed);
    assert_eq!(record.restart_count, 3);
    let last_error = record.last_error.as_deref().unwrap_or("");
    assert!(
        last_error.contains("Restart budget exhausted"),
        "unexpected last_error: {last_error}"
    );

    // A further sweep makes no fourth attempt
    supervisor.poll_units().await;
    assert_eq!(supervisor.status().await[0].restart_count, 3);
}

#[tokio::test]
async fn test_restart_handler_replaces_only_that_process() {
    let dir = TempDir::new().unwrap();
    let supervisor = supervisor_with(
        vec![
            sh_config("w1", "sleep 30", dead_endpoint().await, false, 0),
            sh_config("w2", "sleep 30", dead_endpoint().await, false, 0),
        ],
        &dir,
    )
    .await;

    supervisor.start().await.unwrap();
    let before: Vec<_> = supervisor.status().await;
    let w1_pid = before[0].pid;
    let w2_pid = before[1].pid;

    supervisor.restart_handler(&HandlerId::new("w1")).await.unwrap();

    let after = supervisor.status().await;
    assert_eq!(after[0].status, UnitStatus::Running);
    assert_ne!(after[0].pid, w1_pid, "w1 should run under a new pid");
    assert_eq!(after[0].restart_count, 0);
    assert_eq!(after[1].pid, w2_pid, "w2 must be unaffected");

    supervisor.stop(Duration::from_millis(500)).await.unwrap();
}

#[tokio::test]
async fn test_restart_handler_unknown_id_is_not_found() {
    let dir = TempDir::new().unwrap();
    let supervisor = supervisor_with(vec![], &dir).await;

    let result = supervisor.restart_handler(&HandlerId::new("ghost")).await;
    assert!(matches!(result, Err(CoordinatorError::NotFound { .. })));
}

/// A record whose pid no longer exists is cleared on start instead of being
/// trusted
#[tokio::test]
async fn test_stale_record_is_cleared_on_start() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);

    // Simulate a previous run that recorded a pid which is long gone
    let previous = StateStore::new(settings.state_file.clone());
    previous
        .record(StoredProcess {
            handler_id: HandlerId::new("w1"),
            pid: 999_999_999,
            started_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

    let endpoint = dead_endpoint().await;
    let supervisor =
        supervisor_with(vec![sh_config("w1", "sleep 30", endpoint, false, 0)], &dir).await;
    supervisor.start().await.unwrap();

    let records = supervisor.status().await;
    assert_eq!(records[0].status, UnitStatus::Running);
    assert_ne!(records[0].pid, Some(999_999_999));

    supervisor.stop(Duration::from_millis(500)).await.unwrap();
}

/// A recorded process that is still alive with a matching start-time
/// fingerprint is adopted rather than relaunched as a duplicate
#[tokio::test]
async fn test_live_recorded_process_is_adopted_on_start() {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);

    // Impersonate a worker left over from a previous coordinator run
    let mut leftover = tokio::process::Command::new("sleep")
        .arg("30")
        .spawn()
        .unwrap();
    let pid = leftover.id().expect("pid");
    let reaper = tokio::spawn(async move {
        let _ = leftover.wait().await;
    });

    let previous = StateStore::new(settings.state_file.clone());
    previous
        .record(StoredProcess {
            handler_id: HandlerId::new("w1"),
            pid,
            started_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

    let endpoint = dead_endpoint().await;
    let supervisor =
        supervisor_with(vec![sh_config("w1", "sleep 30", endpoint, false, 0)], &dir).await;
    supervisor.start().await.unwrap();

    let records = supervisor.status().await;
    assert_eq!(records[0].status, UnitStatus::Running);
    assert_eq!(records[0].pid, Some(pid), "the live process should be adopted");

    // Stopping supervises the adopted process by signal
    supervisor.stop(Duration::from_millis(500)).await.unwrap();
    assert_eq!(supervisor.status().await[0].status, UnitStatus::Stopped);
    let _ = reaper.await;
}

#[tokio::test]
async fn test_metrics_aggregate_counts() {
    let dir = TempDir::new().unwrap();
    let supervisor = supervisor_with(
        vec![
            sh_config("steady", "sleep 30", dead_endpoint().await, false, 0),
            sh_config("flappy", "exit 7", dead_endpoint().await, true, 1),
        ],
        &dir,
    )
    .await;

    supervisor.start().await.unwrap();
    for _ in 0..6 {
        supervisor.poll_units().await;
    }

    let metrics = supervisor.get_metrics().await;
    assert_eq!(metrics.total_units, 2);
    assert_eq!(metrics.healthy_units, 1);
    assert_eq!(metrics.total_restarts, 1);

    let health = supervisor.health_check().await;
    assert_eq!(health[&HandlerId::new("steady")], true);
    assert_eq!(health[&HandlerId::new("flappy")], false);

    supervisor.stop(Duration::from_millis(500)).await.unwrap();
}
