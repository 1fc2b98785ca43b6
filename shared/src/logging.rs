//! Shared logging utilities for consistent tracing across all processes

use chrono::{DateTime, Utc};

use crate::types::ProcessId;

/// Initialize tracing subscriber with process-specific configuration
/// Uses the global process ID that must be initialized first
pub fn init_tracing() {
    init_tracing_with_level(None);
}

/// Initialize tracing subscriber with an explicit base log level
pub fn init_tracing_with_level(log_level: Option<&str>) {
    use tracing_subscriber::{fmt, EnvFilter};

    let process_id = ProcessId::current();
    let base_level = log_level.unwrap_or("info");

    let env_filter = match process_id {
        ProcessId::Coordinator => {
            format!("coordinator={base_level},shared={base_level}")
        }
        ProcessId::Handler(_) => {
            format!("handler={base_level},shared={base_level}")
        }
    };

    fmt()
        .with_env_filter(EnvFilter::new(&env_filter))
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Get formatted timestamp for consistent logging
pub fn format_timestamp() -> String {
    let now: DateTime<Utc> = Utc::now();
    now.format("%H:%M:%S%.3f").to_string()
}

/// Macro for process-aware info logging
#[macro_export]
macro_rules! process_info {
    ($process_id:expr, $($arg:tt)*) => {
        tracing::info!(
            process = %$process_id,
            timestamp = shared::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for process-aware warning logging
#[macro_export]
macro_rules! process_warn {
    ($process_id:expr, $($arg:tt)*) => {
        tracing::warn!(
            process = %$process_id,
            timestamp = shared::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for process-aware error logging
#[macro_export]
macro_rules! process_error {
    ($process_id:expr, $($arg:tt)*) => {
        tracing::error!(
            process = %$process_id,
            timestamp = shared::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for process-aware debug logging
#[macro_export]
macro_rules! process_debug {
    ($process_id:expr, $($arg:tt)*) => {
        tracing::debug!(
            process = %$process_id,
            timestamp = shared::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Contextual logging helper for startup messages
pub fn log_startup(process_id: &ProcessId, details: &str) {
    tracing::info!(
        process = %process_id,
        timestamp = format_timestamp(),
        "Starting {}",
        details
    );
}

/// Contextual logging helper for shutdown messages
pub fn log_shutdown(process_id: &ProcessId, reason: &str) {
    tracing::info!(
        process = %process_id,
        timestamp = format_timestamp(),
        "Shutting down: {}",
        reason
    );
}

/// Contextual logging helper for error conditions
pub fn log_error(process_id: &ProcessId, context: &str, error: &dyn std::fmt::Display) {
    tracing::error!(
        process = %process_id,
        timestamp = format_timestamp(),
        error = %error,
        "{} failed: {}",
        context,
        error
    );
}

/// Contextual logging helper for success conditions
pub fn log_success(process_id: &ProcessId, message: &str) {
    tracing::info!(
        process = %process_id,
        timestamp = format_timestamp(),
        "{}",
        message
    );
}
