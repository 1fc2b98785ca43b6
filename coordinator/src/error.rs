//! Coordinator-specific error types

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

use shared::{HandlerId, SharedError};

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("No reply from {endpoint} within {timeout:?}")]
    Timeout { endpoint: SocketAddr, timeout: Duration },

    #[error("Request/reply session to {endpoint} left in an invalid state")]
    SessionState { endpoint: SocketAddr },

    #[error("Transport fault on session to {endpoint}: {message}")]
    Transport { endpoint: SocketAddr, message: String },

    #[error("No session could be established to {endpoint}: {message}")]
    Unreachable { endpoint: SocketAddr, message: String },

    #[error("Handler rejected {method}: {message}")]
    Handler { method: String, message: String },

    #[error("Handler id already registered: {id}")]
    ConflictingId { id: HandlerId },

    #[error("Unknown handler id: {id}")]
    NotFound { id: HandlerId },

    #[error("Restart budget exhausted for handler {id} after {attempts} attempts")]
    RestartBudgetExhausted { id: HandlerId, attempts: u32 },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Process management failed: {message}")]
    Process { message: String },

    #[error("Shared component error")]
    Shared(#[from] SharedError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoordinatorError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::Process {
            message: message.into(),
        }
    }

    pub fn transport(endpoint: SocketAddr, message: impl Into<String>) -> Self {
        Self::Transport {
            endpoint,
            message: message.into(),
        }
    }

    pub fn unreachable(endpoint: SocketAddr, message: impl Into<String>) -> Self {
        Self::Unreachable {
            endpoint,
            message: message.into(),
        }
    }
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
