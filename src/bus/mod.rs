//! # Message Transport Seam
//!
//! The kernel consumes a narrow transport contract and never reimplements
//! one: point-to-point send with at most one reply, fire-and-forget publish,
//! and service registration for routing by resource id. [`InMemoryBus`]
//! backs tests and single-process embedding.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::error::{OrchestrationError, Result};

/// An event published to anyone listening; no reply expected
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub name: String,
    pub resource_id: Uuid,
    pub payload: Value,
    pub error: Option<String>,
    pub published_at: DateTime<Utc>,
}

impl BusEvent {
    pub fn success(name: impl Into<String>, resource_id: Uuid, payload: Value) -> Self {
        Self {
            name: name.into(),
            resource_id,
            payload,
            error: None,
            published_at: Utc::now(),
        }
    }

    pub fn failure(
        name: impl Into<String>,
        resource_id: Uuid,
        error: &OrchestrationError,
    ) -> Self {
        Self {
            name: name.into(),
            resource_id,
            payload: Value::Null,
            error: Some(error.to_string()),
            published_at: Utc::now(),
        }
    }
}

/// Handler a service registers to receive point-to-point requests
pub type ServiceHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Transport contract: at most one reply per send, fire-and-forget publish
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Point-to-point request to a registered service; resolves with its
    /// single reply
    async fn send(&self, service_id: &str, request: Value) -> Result<Value>;

    /// Broadcast an event; no reply expected
    async fn publish(&self, event: BusEvent) -> Result<()>;

    /// Register a service so requests can be routed to it by id
    async fn register_service(&self, service_id: &str, handler: ServiceHandler) -> Result<()>;

    /// Remove a service registration
    async fn unregister_service(&self, service_id: &str) -> Result<()>;
}

/// Channel-backed transport for tests and single-process deployment
pub struct InMemoryBus {
    services: DashMap<String, ServiceHandler>,
    events: broadcast::Sender<BusEvent>,
}

impl InMemoryBus {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity);
        Self {
            services: DashMap::new(),
            events,
        }
    }

    /// Subscribe to published events
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.events.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn send(&self, service_id: &str, request: Value) -> Result<Value> {
        let handler = self
            .services
            .get(service_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                OrchestrationError::Internal(format!("no service registered for id [{service_id}]"))
            })?;
        handler(request).await
    }

    async fn publish(&self, event: BusEvent) -> Result<()> {
        debug!(event = %event.name, resource_id = %event.resource_id, "publishing event");
        // No subscribers is fine; publish is fire-and-forget
        let _ = self.events.send(event);
        Ok(())
    }

    async fn register_service(&self, service_id: &str, handler: ServiceHandler) -> Result<()> {
        self.services.insert(service_id.to_string(), handler);
        Ok(())
    }

    async fn unregister_service(&self, service_id: &str) -> Result<()> {
        self.services.remove(service_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_send_routes_to_registered_service() {
        let bus = InMemoryBus::default();
        bus.register_service(
            "echo",
            Arc::new(|request| Box::pin(async move { Ok(request) })),
        )
        .await
        .unwrap();

        let reply = bus.send("echo", json!({"ping": 1})).await.unwrap();
        assert_eq!(reply, json!({"ping": 1}));
    }

    #[tokio::test]
    async fn test_send_to_unknown_service_fails() {
        let bus = InMemoryBus::default();
        let err = bus.send("nowhere", Value::Null).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::Internal(_)));
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = InMemoryBus::default();
        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();
        bus.publish(BusEvent::success("resource.started", id, Value::Null))
            .await
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, "resource.started");
        assert_eq!(event.resource_id, id);
        assert!(event.error.is_none());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let bus = InMemoryBus::default();
        bus.publish(BusEvent::success("quiet", Uuid::new_v4(), Value::Null))
            .await
            .unwrap();
    }
}
