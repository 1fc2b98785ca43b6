//! Request/reply server loop and method dispatch
//!
//! Each accepted connection is served independently: read one request frame,
//! answer with exactly one reply frame, repeat until the peer disconnects.
//! The coordinator enforces the alternation on its side; this loop simply
//! never sends an unsolicited frame.

use serde_json::json;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;

use shared::{
    process_debug, process_info, read_frame, write_frame, ProcessId, RpcRequest, RpcResponse,
    SharedResult, PING_METHOD,
};

pub struct HandlerServer {
    id: String,
    started: Instant,
}

impl HandlerServer {
    pub fn new(id: String) -> Self {
        Self {
            id,
            started: Instant::now(),
        }
    }

    pub async fn run(&self, listen: SocketAddr) -> anyhow::Result<()> {
        let listener = TcpListener::bind(listen).await?;
        process_info!(
            ProcessId::current(),
            "Listening for coordinator calls on {}",
            listen
        );

        loop {
            let (stream, peer) = listener.accept().await?;
            let dispatcher = Dispatcher {
                id: self.id.clone(),
                started: self.started,
            };
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, dispatcher).await {
                    process_debug!(
                        ProcessId::current(),
                        "Connection from {} closed: {}",
                        peer,
                        e
                    );
                }
            });
        }
    }
}

async fn serve_connection(mut stream: TcpStream, dispatcher: Dispatcher) -> SharedResult<()> {
    loop {
        let request: RpcRequest = read_frame(&mut stream).await?;
        let response = dispatcher.dispatch(&request).await;
        write_frame(&mut stream, &response).await?;
    }
}

#[derive(Clone)]
struct Dispatcher {
    id: String,
    started: Instant,
}

impl Dispatcher {
    async fn dispatch(&self, request: &RpcRequest) -> RpcResponse {
        let params = match request.params_value() {
            Ok(params) => params,
            Err(e) => return RpcResponse::error(request.id, format!("bad params: {e}")),
        };

        match request.method.as_str() {
            PING_METHOD => respond(request.id, json!("pong")),
            "echo" => respond(request.id, params),
            "status" => respond(
                request.id,
                json!({
                    "id": self.id,
                    "uptime_secs": self.started.elapsed().as_secs(),
                }),
            ),
            "sleep" => {
                // Debug aid: hold the reply for the requested duration
                let ms = params.get("ms").and_then(|v| v.as_u64()).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                respond(request.id, json!({ "slept_ms": ms }))
            }
            other => RpcResponse::error(request.id, format!("unknown method: {other}")),
        }
    }
}

fn respond(id: Uuid, value: serde_json::Value) -> RpcResponse {
    RpcResponse::ok(id, &value).unwrap_or_else(|e| RpcResponse::error(id, format!("encode failed: {e}")))
}
