//! Request/reply transport session
//!
//! Wraps one point-to-point connection to a worker and enforces the strict
//! alternating send-then-receive discipline of the channel. A request/reply
//! exchange that fails leaves the phase indeterminate (the reply may still be
//! in flight, half-consumed, or lost), so the only recovery primitive is full
//! session replacement: `recreate()`. Partial repair is never attempted.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

use crate::error::{CoordinatorError, CoordinatorResult};
use shared::{process_debug, read_frame, write_frame, ProcessId, RpcRequest, RpcResponse, SharedError};

pub struct TransportSession {
    endpoint: SocketAddr,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
    /// Set when a prior failure left the alternation indeterminate; every
    /// send is refused until the session is recreated
    poisoned: bool,
}

impl TransportSession {
    pub fn new(endpoint: SocketAddr, connect_timeout: Duration) -> Self {
        Self {
            endpoint,
            connect_timeout,
            stream: None,
            poisoned: false,
        }
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Establish a fresh session; a no-op returning success when already
    /// connected
    pub async fn connect(&mut self) -> CoordinatorResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let connect = TcpStream::connect(self.endpoint);
        let stream = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(CoordinatorError::unreachable(self.endpoint, e.to_string())),
            Err(_) => {
                return Err(CoordinatorError::unreachable(
                    self.endpoint,
                    format!("connect timed out after {:?}", self.connect_timeout),
                ))
            }
        };

        self.stream = Some(stream);
        self.poisoned = false;
        process_debug!(ProcessId::current(), "Session established to {}", self.endpoint);
        Ok(())
    }

    /// Send one request and consume exactly one reply, bounded by `timeout`
    pub async fn send_receive(
        &mut self,
        request: &RpcRequest,
        timeout: Duration,
    ) -> CoordinatorResult<RpcResponse> {
        if self.poisoned {
            return Err(CoordinatorError::SessionState {
                endpoint: self.endpoint,
            });
        }

        self.connect().await?;
        let Some(stream) = self.stream.as_mut() else {
            return Err(CoordinatorError::unreachable(
                self.endpoint,
                "session not connected",
            ));
        };

        let exchange = async {
            write_frame(stream, request).await?;
            let response: RpcResponse = read_frame(stream).await?;
            Ok::<RpcResponse, SharedError>(response)
        };

        match tokio::time::timeout(timeout, exchange).await {
            Err(_) => {
                // The reply may still arrive later; the phase is indeterminate
                // until the session is replaced
                self.poisoned = true;
                Err(CoordinatorError::Timeout {
                    endpoint: self.endpoint,
                    timeout,
                })
            }
            Ok(Err(wire_error)) => {
                self.stream = None;
                Err(CoordinatorError::transport(self.endpoint, wire_error.to_string()))
            }
            Ok(Ok(response)) => {
                if response.id != request.id {
                    // Stale reply from an earlier exchange: the alternation
                    // was violated by a prior failure
                    self.poisoned = true;
                    return Err(CoordinatorError::SessionState {
                        endpoint: self.endpoint,
                    });
                }
                Ok(response)
            }
        }
    }

    /// Tear down the current session, discarding any unconsumed message, and
    /// establish a new one against the same endpoint
    ///
    /// Idempotent: recreating an already-torn-down session just connects.
    pub async fn recreate(&mut self) -> CoordinatorResult<()> {
        self.stream = None;
        self.poisoned = false;
        self.connect().await
    }

    /// Release the session; dropping the stream closes the connection without
    /// lingering
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            process_debug!(ProcessId::current(), "Session to {} closed", self.endpoint);
        }
        self.poisoned = false;
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        // Stream teardown happens on every exit path, including panics in
        // the owning task
        self.stream = None;
    }
}
