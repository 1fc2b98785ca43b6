//! Process-based supervisor
//!
//! Implements the supervision contract with OS child processes: launch with a
//! resolved command and environment, graceful SIGTERM stop with a bounded
//! force-kill fallback, crash detection with budgeted auto-restart, and a
//! durable pid record that lets a later coordinator run recognize and
//! reconcile processes from a previous one.
//!
//! Fleet-wide operations fan out with bounded concurrency; operations on one
//! unit are serialized through its own lock so two restarts of the same unit
//! cannot race.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::{HandlerConfig, SupervisorSettings};
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::services::registry::HandlerRegistry;
use crate::services::state_store::{StateStore, StoredProcess};
use crate::state::{ProcessRecord, SupervisorMetrics, UnitStatus};
use crate::traits::Supervisor;
use shared::{process_debug, process_error, process_info, process_warn, HandlerId, ProcessId};

const READY_POLL: Duration = Duration::from_millis(50);
const STOP_POLL: Duration = Duration::from_millis(50);
const FORCE_KILL_GRACE: Duration = Duration::from_secs(1);

/// Supervisor-owned state of one unit; callers only see record snapshots
struct ManagedUnit {
    config: HandlerConfig,
    record: ProcessRecord,
    child: Option<Child>,
    /// Set once the restart budget is exhausted; cleared by operator
    /// intervention (explicit start or targeted restart)
    gave_up: bool,
}

impl ManagedUnit {
    fn new(config: HandlerConfig) -> Self {
        Self {
            record: ProcessRecord::new(config.handler_id.clone()),
            config,
            child: None,
            gave_up: false,
        }
    }
}

pub struct ProcessSupervisor {
    units: Mutex<HashMap<HandlerId, Arc<Mutex<ManagedUnit>>>>,
    store: StateStore,
    registry: Arc<HandlerRegistry>,
    settings: SupervisorSettings,
}

impl ProcessSupervisor {
    pub async fn new(
        configs: Vec<HandlerConfig>,
        store: StateStore,
        registry: Arc<HandlerRegistry>,
        settings: SupervisorSettings,
    ) -> CoordinatorResult<Self> {
        let mut units = HashMap::new();
        for config in configs {
            if units.contains_key(&config.handler_id) {
                return Err(CoordinatorError::ConflictingId {
                    id: config.handler_id,
                });
            }
            registry
                .register_endpoint(config.handler_id.clone(), config.endpoint)
                .await;
            units.insert(
                config.handler_id.clone(),
                Arc::new(Mutex::new(ManagedUnit::new(config))),
            );
        }
        Ok(Self {
            units: Mutex::new(units),
            store,
            registry,
            settings,
        })
    }

    /// Spawn the periodic crash-detection sweep; abort the handle on shutdown
    pub fn spawn_crash_monitor(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let supervisor = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                supervisor.poll_units().await;
            }
        })
    }

    /// One crash-detection sweep over all units: units whose process exited
    /// unexpectedly transition to crashed, and crashed units with remaining
    /// budget are restarted after their backoff
    pub async fn poll_units(&self) {
        let units = self.all_units().await;
        stream::iter(units)
            .for_each_concurrent(self.settings.start_concurrency, |unit| async move {
                self.sweep_unit(&unit).await;
            })
            .await;
    }

    async fn unit(&self, id: &HandlerId) -> Option<Arc<Mutex<ManagedUnit>>> {
        self.units.lock().await.get(id).cloned()
    }

    async fn all_units(&self) -> Vec<Arc<Mutex<ManagedUnit>>> {
        self.units.lock().await.values().cloned().collect()
    }

    /// Launch the unit's process and wait for readiness; caller holds the
    /// unit lock
    async fn launch_locked(&self, unit: &mut ManagedUnit) -> CoordinatorResult<()> {
        let id = unit.config.handler_id.clone();
        unit.record.status = UnitStatus::Starting;
        unit.record.last_error = None;

        let mut cmd = Command::new(&unit.config.command);
        cmd.args(&unit.config.args)
            .env("HANDLER_ID", id.as_str())
            .env("HANDLER_ENDPOINT", unit.config.endpoint.to_string())
            .envs(&unit.config.extra)
            .stdin(Stdio::null());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let message = format!("Failed to spawn {}: {e}", unit.config.command);
                unit.record.status = UnitStatus::Crashed;
                unit.record.pid = None;
                unit.record.last_error = Some(message.clone());
                process_error!(
                    ProcessId::current(),
                    "Handler {} launch failed: {}",
                    id,
                    message
                );
                return Err(CoordinatorError::process(message));
            }
        };

        let pid = child.id();
        let started_at = Utc::now();
        unit.record.pid = pid;
        unit.record.started_at = Some(started_at);

        if let Some(pid) = pid {
            // Persist before the readiness wait: a coordinator crash in
            // between must still leave the pid recoverable
            if let Err(e) = self
                .store
                .record(StoredProcess {
                    handler_id: id.clone(),
                    pid,
                    started_at,
                })
                .await
            {
                process_warn!(
                    ProcessId::current(),
                    "Could not persist process record for handler {}: {}",
                    id,
                    e
                );
            }
        }

        process_info!(
            ProcessId::current(),
            "Launched handler {} (pid {:?}), expecting it on {}",
            id,
            pid,
            unit.config.endpoint
        );

        // Ready when the endpoint accepts connections, or after the grace
        // period when no readiness signal exists
        let deadline = Instant::now() + self.settings.readiness_grace();
        let mut ready = false;
        loop {
            if let Ok(Some(status)) = child.try_wait() {
                let message = format!("exited during startup: {status}");
                unit.record.status = UnitStatus::Crashed;
                unit.record.pid = None;
                unit.record.last_error = Some(message.clone());
                unit.child = None;
                let _ = self.store.remove(&id).await;
                process_error!(ProcessId::current(), "Handler {} {}", id, message);
                // The crash sweep owns what happens next (budgeted restart)
                return Ok(());
            }

            if let Ok(Ok(_)) = tokio::time::timeout(READY_POLL, TcpStream::connect(unit.config.endpoint)).await
            {
                ready = true;
                break;
            }

            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(READY_POLL).await;
        }

        unit.child = Some(child);
        unit.record.status = UnitStatus::Running;
        if ready {
            process_debug!(ProcessId::current(), "Handler {} is accepting connections", id);
        } else {
            process_warn!(
                ProcessId::current(),
                "Handler {} not accepting connections after {:?}; marking running anyway",
                id,
                self.settings.readiness_grace()
            );
        }
        Ok(())
    }

    /// Gracefully stop the unit's process, force-killing after `timeout`;
    /// caller holds the unit lock
    async fn halt_locked(&self, unit: &mut ManagedUnit, timeout: Duration) -> CoordinatorResult<()> {
        let id = unit.config.handler_id.clone();

        if unit.child.is_none() && unit.record.pid.is_none() {
            // Nothing alive; terminal crashed units keep their status so the
            // operator still sees them
            if unit.record.status != UnitStatus::Crashed {
                unit.record.status = UnitStatus::Stopped;
            }
            return Ok(());
        }

        unit.record.status = UnitStatus::Stopping;
        if let Some(pid) = unit.record.pid {
            signal_terminate(pid);
        }
        process_info!(
            ProcessId::current(),
            "Stopping handler {} (pid {:?})",
            id,
            unit.record.pid
        );

        let deadline = Instant::now() + timeout;
        let mut exited = false;
        loop {
            let gone = match unit.child.as_mut() {
                Some(child) => matches!(child.try_wait(), Ok(Some(_))),
                None => !unit.record.pid.map(pid_alive).unwrap_or(false),
            };
            if gone {
                exited = true;
                break;
            }
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(STOP_POLL).await;
        }

        if !exited {
            process_warn!(
                ProcessId::current(),
                "Handler {} did not exit within {:?}; force-killing",
                id,
                timeout
            );
            match unit.child.as_mut() {
                Some(child) => {
                    let _ = child.kill().await;
                }
                None => {
                    if let Some(pid) = unit.record.pid {
                        signal_kill(pid);
                        let kill_deadline = Instant::now() + FORCE_KILL_GRACE;
                        while pid_alive(pid) && Instant::now() < kill_deadline {
                            tokio::time::sleep(STOP_POLL).await;
                        }
                    }
                }
            }
        }

        // The durable record is cleared only after confirmed exit
        if let Err(e) = self.store.remove(&id).await {
            process_warn!(
                ProcessId::current(),
                "Could not clear process record for handler {}: {}",
                id,
                e
            );
        }
        unit.child = None;
        unit.record.pid = None;
        unit.record.status = UnitStatus::Stopped;
        self.registry.invalidate(&id).await;
        Ok(())
    }

    async fn sweep_unit(&self, unit: &Mutex<ManagedUnit>) {
        let mut unit = unit.lock().await;
        match unit.record.status {
            UnitStatus::Running => {
                let exit = match unit.child.as_mut() {
                    Some(child) => match child.try_wait() {
                        Ok(Some(status)) => Some(format!("exited unexpectedly: {status}")),
                        Ok(None) => None,
                        Err(e) => Some(format!("status check failed: {e}")),
                    },
                    None => match unit.record.pid {
                        Some(pid) if pid_alive(pid) => None,
                        Some(_) => Some("adopted process disappeared".to_string()),
                        None => Some("no live process behind running unit".to_string()),
                    },
                };
                let Some(message) = exit else {
                    return;
                };

                let id = unit.config.handler_id.clone();
                process_error!(ProcessId::current(), "Handler {} crashed: {}", id, message);
                unit.child = None;
                unit.record.pid = None;
                unit.record.status = UnitStatus::Crashed;
                unit.record.last_error = Some(message);
                let _ = self.store.remove(&id).await;
                self.registry.invalidate(&id).await;
                self.maybe_restart(&mut unit).await;
            }
            UnitStatus::Crashed => {
                self.maybe_restart(&mut unit).await;
            }
            _ => {}
        }
    }

    /// Budgeted auto-restart of a crashed unit; caller holds the unit lock
    async fn maybe_restart(&self, unit: &mut ManagedUnit) {
        if !unit.config.auto_restart || unit.gave_up {
            return;
        }
        let id = unit.config.handler_id.clone();

        if unit.record.restart_count >= unit.config.max_restarts {
            unit.gave_up = true;
            let error = CoordinatorError::RestartBudgetExhausted {
                id: id.clone(),
                attempts: unit.record.restart_count,
            };
            unit.record.last_error = Some(error.to_string());
            process_error!(
                ProcessId::current(),
                "{}; handler {} requires manual intervention",
                error,
                id
            );
            return;
        }

        unit.record.status = UnitStatus::Restarting;
        unit.record.restart_count += 1;
        process_warn!(
            ProcessId::current(),
            "Restarting handler {} (attempt {}/{}) after {:?}",
            id,
            unit.record.restart_count,
            unit.config.max_restarts,
            unit.config.restart_backoff()
        );
        tokio::time::sleep(unit.config.restart_backoff()).await;

        if let Err(e) = self.launch_locked(unit).await {
            process_error!(
                ProcessId::current(),
                "Restart of handler {} failed: {}",
                id,
                e
            );
        }
    }

    /// Match durable records from a previous run against the kernel's view:
    /// a recorded pid that is still alive with the recorded start-time
    /// fingerprint is adopted (signal-only supervision); anything else is a
    /// stale record and is cleared
    async fn reconcile(&self) -> CoordinatorResult<()> {
        let stored = self.store.load().await?;
        for entry in stored {
            match self.unit(&entry.handler_id).await {
                Some(unit) => {
                    let mut unit = unit.lock().await;
                    if matches!(unit.record.status, UnitStatus::Running | UnitStatus::Starting) {
                        continue;
                    }
                    if pid_alive(entry.pid) && pid_fingerprint_matches(entry.pid, entry.started_at) {
                        process_info!(
                            ProcessId::current(),
                            "Adopting live handler {} process (pid {}) from a previous run",
                            entry.handler_id,
                            entry.pid
                        );
                        unit.record.pid = Some(entry.pid);
                        unit.record.started_at = Some(entry.started_at);
                        unit.record.status = UnitStatus::Running;
                        unit.record.last_error = None;
                        unit.child = None;
                    } else {
                        process_warn!(
                            ProcessId::current(),
                            "Clearing stale process record for handler {} (pid {})",
                            entry.handler_id,
                            entry.pid
                        );
                        self.store.remove(&entry.handler_id).await?;
                    }
                }
                None => {
                    if pid_alive(entry.pid) && pid_fingerprint_matches(entry.pid, entry.started_at) {
                        process_warn!(
                            ProcessId::current(),
                            "Process {} (handler {}) from a previous run is no longer configured; requesting it to stop",
                            entry.pid,
                            entry.handler_id
                        );
                        signal_terminate(entry.pid);
                    }
                    self.store.remove(&entry.handler_id).await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Supervisor for ProcessSupervisor {
    async fn start(&self) -> CoordinatorResult<()> {
        self.reconcile().await?;

        let units = self.all_units().await;
        stream::iter(units)
            .for_each_concurrent(self.settings.start_concurrency, |unit| async move {
                let mut unit = unit.lock().await;
                match unit.record.status {
                    UnitStatus::Stopped | UnitStatus::Crashed => {
                        // Explicit start is operator intervention: the
                        // restart budget begins fresh
                        unit.record.restart_count = 0;
                        unit.gave_up = false;
                        if let Err(e) = self.launch_locked(&mut unit).await {
                            process_error!(
                                ProcessId::current(),
                                "Could not start handler {}: {}",
                                unit.config.handler_id,
                                e
                            );
                        }
                    }
                    // Already running or mid-transition; left untouched
                    _ => {}
                }
            })
            .await;
        Ok(())
    }

    async fn stop(&self, timeout: Duration) -> CoordinatorResult<()> {
        let units = self.all_units().await;
        stream::iter(units)
            .for_each_concurrent(self.settings.start_concurrency, |unit| async move {
                let mut unit = unit.lock().await;
                if let Err(e) = self.halt_locked(&mut unit, timeout).await {
                    process_error!(
                        ProcessId::current(),
                        "Could not stop handler {}: {}",
                        unit.config.handler_id,
                        e
                    );
                }
            })
            .await;
        Ok(())
    }

    async fn restart(&self, timeout: Duration) -> CoordinatorResult<()> {
        self.stop(timeout).await?;
        self.start().await
    }

    async fn status(&self) -> Vec<ProcessRecord> {
        let units = self.all_units().await;
        let mut records = Vec::with_capacity(units.len());
        for unit in units {
            records.push(unit.lock().await.record.clone());
        }
        records.sort_by(|a, b| a.handler_id.cmp(&b.handler_id));
        records
    }

    async fn add_handler(&self, config: HandlerConfig) -> CoordinatorResult<()> {
        let unit = {
            let mut units = self.units.lock().await;
            if units.contains_key(&config.handler_id) {
                return Err(CoordinatorError::ConflictingId {
                    id: config.handler_id,
                });
            }
            let unit = Arc::new(Mutex::new(ManagedUnit::new(config.clone())));
            units.insert(config.handler_id.clone(), Arc::clone(&unit));
            unit
        };

        self.registry
            .register_endpoint(config.handler_id.clone(), config.endpoint)
            .await;

        let mut guard = unit.lock().await;
        self.launch_locked(&mut guard).await
    }

    async fn remove_handler(&self, id: &HandlerId) -> CoordinatorResult<()> {
        let removed = self.units.lock().await.remove(id);
        let Some(unit) = removed else {
            // Already forgotten
            return Ok(());
        };

        {
            let mut guard = unit.lock().await;
            self.halt_locked(&mut guard, self.settings.stop_timeout()).await?;
        }
        self.registry.deregister(id).await;
        process_info!(ProcessId::current(), "Handler {} removed", id);
        Ok(())
    }

    async fn restart_handler(&self, id: &HandlerId) -> CoordinatorResult<()> {
        let unit = self
            .unit(id)
            .await
            .ok_or_else(|| CoordinatorError::NotFound { id: id.clone() })?;

        let mut guard = unit.lock().await;
        self.halt_locked(&mut guard, self.settings.stop_timeout()).await?;
        // Manual restart clears the automatic-restart budget
        guard.record.restart_count = 0;
        guard.gave_up = false;
        self.launch_locked(&mut guard).await
    }

    async fn health_check(&self) -> HashMap<HandlerId, bool> {
        let mut health = HashMap::new();
        for unit in self.all_units().await {
            let mut unit = unit.lock().await;
            let alive = match unit.child.as_mut() {
                Some(child) => matches!(child.try_wait(), Ok(None)),
                None => unit.record.pid.map(pid_alive).unwrap_or(false),
            };
            health.insert(unit.config.handler_id.clone(), alive);
        }
        health
    }

    async fn get_metrics(&self) -> SupervisorMetrics {
        let mut metrics = SupervisorMetrics::default();
        for unit in self.all_units().await {
            let mut unit = unit.lock().await;
            metrics.total_units += 1;
            metrics.total_restarts += u64::from(unit.record.restart_count);
            let alive = match unit.child.as_mut() {
                Some(child) => matches!(child.try_wait(), Ok(None)),
                None => unit.record.pid.map(pid_alive).unwrap_or(false),
            };
            if alive {
                metrics.healthy_units += 1;
            }
        }
        metrics
    }
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid as i32), None::<Signal>).is_ok()
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
fn signal_terminate(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
}

#[cfg(not(unix))]
fn signal_terminate(_pid: u32) {}

#[cfg(unix)]
fn signal_kill(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
}

#[cfg(not(unix))]
fn signal_kill(_pid: u32) {}

const FINGERPRINT_SLACK_SECS: i64 = 5;

/// Pid numbers get reused by the OS; compare the kernel's start time for
/// `pid` against the recorded launch timestamp before trusting the record
#[cfg(target_os = "linux")]
fn pid_fingerprint_matches(pid: u32, recorded: DateTime<Utc>) -> bool {
    match proc_start_time(pid) {
        Some(actual) => (actual - recorded).num_seconds().abs() <= FINGERPRINT_SLACK_SECS,
        None => false,
    }
}

#[cfg(not(target_os = "linux"))]
fn pid_fingerprint_matches(_pid: u32, _recorded: DateTime<Utc>) -> bool {
    // No portable start-time source; fall back to trusting the pid alone
    true
}

#[cfg(target_os = "linux")]
fn proc_start_time(pid: u32) -> Option<DateTime<Utc>> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // Field 22 (starttime) counts clock ticks since boot; skip past the
    // parenthesized comm field, which may itself contain spaces
    let rest = stat.rsplit_once(')')?.1;
    let starttime_ticks: u64 = rest.split_whitespace().nth(19)?.parse().ok()?;

    let boot = std::fs::read_to_string("/proc/stat").ok()?;
    let btime: i64 = boot
        .lines()
        .find_map(|line| line.strip_prefix("btime ").and_then(|v| v.trim().parse().ok()))?;

    let hz = clock_ticks_per_second();
    let secs_since_boot = (starttime_ticks / hz) as i64;
    DateTime::<Utc>::from_timestamp(btime + secs_since_boot, 0)
}

#[cfg(target_os = "linux")]
fn clock_ticks_per_second() -> u64 {
    use nix::unistd::{sysconf, SysconfVar};
    match sysconf(SysconfVar::CLK_TCK) {
        Ok(Some(ticks)) if ticks > 0 => ticks as u64,
        _ => 100,
    }
}
