//! Handler registry mapping stable identities to live RPC clients
//!
//! The single point other components use to reach a named worker. Guarantees
//! at most one live client per handler id: concurrent callers requesting the
//! same id converge on the same instance, and clients in a terminal broken
//! state are fully released and evicted before a replacement is created.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::ClientSettings;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::services::rpc_client::RpcClient;
use shared::{process_debug, HandlerId, ProcessId};

pub struct HandlerRegistry {
    settings: ClientSettings,
    /// Known endpoint per handler identity
    endpoints: Mutex<HashMap<HandlerId, SocketAddr>>,
    /// Live clients; the map lock is held across creation so first callers
    /// converge on one instance
    clients: Mutex<HashMap<HandlerId, Arc<RpcClient>>>,
}

impl HandlerRegistry {
    pub fn new(settings: ClientSettings) -> Self {
        Self {
            settings,
            endpoints: Mutex::new(HashMap::new()),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Record (or update) the endpoint a handler answers on
    pub async fn register_endpoint(&self, id: HandlerId, endpoint: SocketAddr) {
        let mut endpoints = self.endpoints.lock().await;
        endpoints.insert(id.clone(), endpoint);
        process_debug!(ProcessId::current(), "Registered handler {} at {}", id, endpoint);
    }

    /// Forget a handler entirely: endpoint and any live client
    pub async fn deregister(&self, id: &HandlerId) {
        self.endpoints.lock().await.remove(id);
        self.invalidate(id).await;
    }

    pub async fn endpoint_of(&self, id: &HandlerId) -> Option<SocketAddr> {
        self.endpoints.lock().await.get(id).copied()
    }

    /// Return the cached client for `id`, or construct one from its known
    /// endpoint
    ///
    /// A client in a terminal broken state is terminated and evicted first;
    /// the caller gets a fresh replacement.
    pub async fn get_client(&self, id: &HandlerId) -> CoordinatorResult<Arc<RpcClient>> {
        let mut clients = self.clients.lock().await;

        if let Some(existing) = clients.get(id) {
            if !existing.is_broken() {
                return Ok(Arc::clone(existing));
            }
            if let Some(stale) = clients.remove(id) {
                stale.terminate().await;
                process_debug!(
                    ProcessId::current(),
                    "Evicted broken client for handler {}",
                    id
                );
            }
        }

        let endpoint = self
            .endpoints
            .lock()
            .await
            .get(id)
            .copied()
            .ok_or_else(|| CoordinatorError::NotFound { id: id.clone() })?;

        let client = Arc::new(RpcClient::new(id.clone(), endpoint, &self.settings));
        clients.insert(id.clone(), Arc::clone(&client));
        Ok(client)
    }

    /// Explicit eviction hook, used when the supervisor restarts a handler
    /// (its endpoint may be rebound); the next `get_client` builds a fresh one
    pub async fn invalidate(&self, id: &HandlerId) {
        let removed = self.clients.lock().await.remove(id);
        if let Some(client) = removed {
            client.terminate().await;
            process_debug!(
                ProcessId::current(),
                "Invalidated client for handler {}",
                id
            );
        }
    }

    /// Release every live client
    pub async fn shutdown(&self) {
        let clients = {
            let mut map = self.clients.lock().await;
            std::mem::take(&mut *map)
        };
        for (_, client) in clients {
            client.terminate().await;
        }
        process_debug!(ProcessId::current(), "Registry clients released");
    }
}
