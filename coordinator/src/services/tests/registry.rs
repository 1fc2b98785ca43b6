//! Tests for the handler registry's one-client-per-identity guarantee

use serde_json::json;
use std::sync::Arc;

use super::common::{client_settings, dead_endpoint, spawn_worker, WorkerScript};
use crate::error::CoordinatorError;
use crate::services::registry::HandlerRegistry;
use shared::HandlerId;

#[tokio::test]
async fn test_unknown_handler_is_not_found() {
    let registry = HandlerRegistry::new(client_settings());

    let result = registry.get_client(&HandlerId::new("missing")).await;
    assert!(matches!(result, Err(CoordinatorError::NotFound { .. })));
}

#[tokio::test]
async fn test_get_client_reuses_the_cached_instance() {
    let (addr, _worker) = spawn_worker(WorkerScript::default()).await;
    let registry = HandlerRegistry::new(client_settings());
    let id = HandlerId::new("w1");
    registry.register_endpoint(id.clone(), addr).await;

    let first = registry.get_client(&id).await.unwrap();
    let second = registry.get_client(&id).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

/// Concurrent first callers converge on one client instance
#[tokio::test]
async fn test_concurrent_callers_converge() {
    let (addr, _worker) = spawn_worker(WorkerScript::default()).await;
    let registry = Arc::new(HandlerRegistry::new(client_settings()));
    let id = HandlerId::new("w1");
    registry.register_endpoint(id.clone(), addr).await;

    let (a, b) = tokio::join!(registry.get_client(&id), registry.get_client(&id));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(Arc::ptr_eq(&a, &b));
}

#[tokio::test]
async fn test_invalidate_forces_a_fresh_client() {
    let (addr, _worker) = spawn_worker(WorkerScript::default()).await;
    let registry = HandlerRegistry::new(client_settings());
    let id = HandlerId::new("w1");
    registry.register_endpoint(id.clone(), addr).await;

    let first = registry.get_client(&id).await.unwrap();
    registry.invalidate(&id).await;
    let second = registry.get_client(&id).await.unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
}

/// A client in a terminal broken state is evicted and replaced on next use
#[tokio::test]
async fn test_broken_client_is_evicted() {
    let addr = dead_endpoint().await;
    let registry = HandlerRegistry::new(client_settings());
    let id = HandlerId::new("w1");
    registry.register_endpoint(id.clone(), addr).await;

    let first = registry.get_client(&id).await.unwrap();
    let result = first.call("echo", json!({})).await;
    assert!(matches!(result, Err(CoordinatorError::Unreachable { .. })));
    assert!(first.is_broken());

    let second = registry.get_client(&id).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_deregister_forgets_the_handler() {
    let (addr, _worker) = spawn_worker(WorkerScript::default()).await;
    let registry = HandlerRegistry::new(client_settings());
    let id = HandlerId::new("w1");
    registry.register_endpoint(id.clone(), addr).await;

    registry.get_client(&id).await.unwrap();
    registry.deregister(&id).await;

    assert!(registry.endpoint_of(&id).await.is_none());
    let result = registry.get_client(&id).await;
    assert!(matches!(result, Err(CoordinatorError::NotFound { .. })));
}
