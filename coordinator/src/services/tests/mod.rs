//! Service-specific tests
//!
//! Each service has its own test file; the in-test worker fixture below
//! speaks the real frame protocol so transport, client, and registry tests
//! exercise actual sockets rather than mocks.

#[cfg(unix)]
mod process_supervisor;
mod registry;

pub mod common {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use uuid::Uuid;

    use crate::config::ClientSettings;
    use shared::{read_frame, write_frame, RpcRequest, RpcResponse, PING_METHOD};

    /// Scripted misbehavior applied to the first requests a worker sees,
    /// counted across all connections
    #[derive(Clone, Default)]
    pub struct WorkerScript {
        /// Reply to this many initial requests with a stale correlation id
        pub stale_replies: usize,
        /// Hold this many initial replies for `delay`
        pub delayed_replies: usize,
        pub delay: Duration,
    }

    /// In-test worker speaking the frame protocol: answers "ping" with
    /// "pong", fails "boom", and echoes params back for everything else
    pub async fn spawn_worker(script: WorkerScript) -> (SocketAddr, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test worker");
        let addr = listener.local_addr().expect("local addr");
        let seen = Arc::new(AtomicUsize::new(0));

        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let script = script.clone();
                let seen = Arc::clone(&seen);
                tokio::spawn(async move {
                    loop {
                        let Ok(request) = read_frame::<RpcRequest, _>(&mut stream).await else {
                            break;
                        };
                        let seq = seen.fetch_add(1, Ordering::SeqCst);

                        if seq < script.delayed_replies {
                            tokio::time::sleep(script.delay).await;
                        }

                        let reply_id = if seq < script.stale_replies {
                            Uuid::new_v4()
                        } else {
                            request.id
                        };

                        let response = match request.method.as_str() {
                            "boom" => RpcResponse::error(reply_id, "boom failed"),
                            PING_METHOD => {
                                RpcResponse::ok(reply_id, &serde_json::json!("pong")).expect("encode pong")
                            }
                            _ => {
                                let params = request
                                    .params_value()
                                    .unwrap_or(serde_json::Value::Null);
                                RpcResponse::ok(reply_id, &params).expect("encode echo")
                            }
                        };

                        if write_frame(&mut stream, &response).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        (addr, handle)
    }

    /// An endpoint nothing listens on (bound, then immediately released)
    pub async fn dead_endpoint() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);
        addr
    }

    /// Short timeouts so failure-path tests stay fast
    pub fn client_settings() -> ClientSettings {
        ClientSettings {
            call_timeout: Duration::from_millis(500),
            connect_timeout: Duration::from_millis(500),
        }
    }
}
