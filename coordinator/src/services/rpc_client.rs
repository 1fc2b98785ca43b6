//! RPC client with timeout, bounded retry, and automatic reconnect
//!
//! Hides transport session churn from callers: a session-state violation is
//! recovered locally with one recreate-and-retry, while a timeout poisons the
//! session (it is replaced) but is surfaced without retrying — the call may
//! have executed on the worker, so retry safety is the caller's decision.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::ClientSettings;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::services::transport::TransportSession;
use shared::{process_debug, process_error, process_warn, HandlerId, ProcessId, RpcRequest, RpcResponse, PING_METHOD};

pub struct RpcClient {
    handler_id: HandlerId,
    endpoint: SocketAddr,
    call_timeout: Duration,
    /// Serializes callers: at most one in-flight request per session
    session: Mutex<TransportSession>,
    /// Set once no session could be established at all; the registry evicts
    /// clients in this state
    broken: AtomicBool,
}

impl RpcClient {
    pub fn new(handler_id: HandlerId, endpoint: SocketAddr, settings: &ClientSettings) -> Self {
        Self {
            handler_id,
            endpoint,
            call_timeout: settings.call_timeout,
            session: Mutex::new(TransportSession::new(endpoint, settings.connect_timeout)),
            broken: AtomicBool::new(false),
        }
    }

    pub fn handler_id(&self) -> &HandlerId {
        &self.handler_id
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    /// Invoke `method` with the client's configured timeout and automatic
    /// reconnect
    pub async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> CoordinatorResult<serde_json::Value> {
        self.call_with_options(method, params, self.call_timeout, true)
            .await
    }

    /// Invoke `method`, bounded by `timeout`
    ///
    /// On a session-state fault the session is recreated and the call retried
    /// exactly once. On a timeout the session is recreated when
    /// `auto_reconnect` is set, but the call is NOT retried: the worker may
    /// have executed it, and only the caller knows whether a duplicate is safe.
    pub async fn call_with_options(
        &self,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
        auto_reconnect: bool,
    ) -> CoordinatorResult<serde_json::Value> {
        let request = RpcRequest::new(method, &params).map_err(CoordinatorError::Shared)?;
        let mut session = self.session.lock().await;

        if let Err(e) = session.connect().await {
            self.broken.store(true, Ordering::SeqCst);
            return Err(e);
        }
        self.broken.store(false, Ordering::SeqCst);

        match session.send_receive(&request, timeout).await {
            Ok(response) => self.decode(method, response),
            Err(CoordinatorError::SessionState { .. }) => {
                process_warn!(
                    ProcessId::current(),
                    "Session to handler {} at {} in invalid state; recreating before retrying {}",
                    self.handler_id,
                    self.endpoint,
                    method
                );
                if let Err(e) = session.recreate().await {
                    self.broken.store(true, Ordering::SeqCst);
                    return Err(e);
                }
                // One bounded retry on the fresh session, then surface
                let retry = RpcRequest::new(method, &params).map_err(CoordinatorError::Shared)?;
                match session.send_receive(&retry, timeout).await {
                    Ok(response) => self.decode(method, response),
                    Err(e) => {
                        process_error!(
                            ProcessId::current(),
                            "Retry of {} on handler {} at {} failed: {}",
                            method,
                            self.handler_id,
                            self.endpoint,
                            e
                        );
                        Err(e)
                    }
                }
            }
            Err(timed_out @ CoordinatorError::Timeout { .. }) => {
                if auto_reconnect {
                    // The timed-out session is presumed poisoned; replace it
                    // now so the next call starts clean
                    process_warn!(
                        ProcessId::current(),
                        "Call {} to handler {} at {} timed out; recreating session",
                        method,
                        self.handler_id,
                        self.endpoint
                    );
                    if let Err(e) = session.recreate().await {
                        self.broken.store(true, Ordering::SeqCst);
                        process_warn!(
                            ProcessId::current(),
                            "Session to handler {} at {} could not be recreated: {}",
                            self.handler_id,
                            self.endpoint,
                            e
                        );
                    }
                }
                Err(timed_out)
            }
            Err(e) => {
                process_error!(
                    ProcessId::current(),
                    "Call {} to handler {} at {} failed: {}",
                    method,
                    self.handler_id,
                    self.endpoint,
                    e
                );
                Err(e)
            }
        }
    }

    /// Reserved no-op call used by health checks
    pub async fn ping(&self, timeout: Duration) -> CoordinatorResult<()> {
        self.call_with_options(PING_METHOD, serde_json::Value::Null, timeout, true)
            .await
            .map(|_| ())
    }

    /// Release the owned session; safe to call more than once
    pub async fn terminate(&self) {
        let mut session = self.session.lock().await;
        session.close();
        self.broken.store(true, Ordering::SeqCst);
        process_debug!(
            ProcessId::current(),
            "Client for handler {} at {} terminated",
            self.handler_id,
            self.endpoint
        );
    }

    fn decode(&self, method: &str, response: RpcResponse) -> CoordinatorResult<serde_json::Value> {
        match response.result_value().map_err(CoordinatorError::Shared)? {
            Ok(value) => Ok(value),
            Err(message) => Err(CoordinatorError::Handler {
                method: method.to_string(),
                message,
            }),
        }
    }
}
