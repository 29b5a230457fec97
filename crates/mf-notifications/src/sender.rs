//! Notification sender contract and in-process implementations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mf_core::traits::Id;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// What happened to the order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEventKind {
    Created,
    Scheduled,
    TechnicianAssigned,
    Started,
    PartsShortageReported,
    Resumed,
    AssetAdvanced,
    ActivityCompleted,
    Finished,
    Approved,
    Cancelled,
}

/// Event emitted after a committed orchestrator operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderEvent {
    /// Stable id for downstream deduplication (delivery is at-least-once)
    pub event_id: Uuid,
    pub order_id: Id,
    pub order_code: String,
    pub kind: OrderEventKind,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl OrderEvent {
    pub fn new(
        order_id: Id,
        order_code: impl Into<String>,
        kind: OrderEventKind,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            order_id,
            order_code: order_code.into(),
            kind,
            payload,
            occurred_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Fire-and-forget notification collaborator
///
/// Failures must never fail the business transition that produced the event;
/// callers log and move on. At-least-once delivery is expected downstream.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn notify(&self, event: OrderEvent) -> Result<(), NotifyError>;
}

/// Sender that logs events through tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSender;

#[async_trait]
impl NotificationSender for TracingSender {
    async fn notify(&self, event: OrderEvent) -> Result<(), NotifyError> {
        tracing::info!(
            event_id = %event.event_id,
            order_id = event.order_id,
            order_code = %event.order_code,
            kind = ?event.kind,
            "order event"
        );
        Ok(())
    }
}

/// In-memory sender for tests
#[derive(Default)]
pub struct MemorySender {
    events: RwLock<Vec<OrderEvent>>,
    fail: bool,
}

impl MemorySender {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sender whose deliveries always fail, for exercising the
    /// log-and-continue path.
    pub fn failing() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            fail: true,
        }
    }

    pub async fn events(&self) -> Vec<OrderEvent> {
        self.events.read().await.clone()
    }

    pub async fn kinds(&self) -> Vec<OrderEventKind> {
        self.events.read().await.iter().map(|e| e.kind).collect()
    }
}

#[async_trait]
impl NotificationSender for MemorySender {
    async fn notify(&self, event: OrderEvent) -> Result<(), NotifyError> {
        if self.fail {
            return Err(NotifyError::Delivery("sender unavailable".into()));
        }
        self.events.write().await.push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_sender_records_events_in_order() {
        let sender = MemorySender::new();
        sender
            .notify(OrderEvent::new(
                1,
                "SO-202601-0001",
                OrderEventKind::Created,
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        sender
            .notify(OrderEvent::new(
                1,
                "SO-202601-0001",
                OrderEventKind::Scheduled,
                serde_json::json!({}),
            ))
            .await
            .unwrap();

        assert_eq!(
            sender.kinds().await,
            vec![OrderEventKind::Created, OrderEventKind::Scheduled]
        );
    }

    #[tokio::test]
    async fn failing_sender_reports_delivery_error() {
        let sender = MemorySender::failing();
        let err = sender
            .notify(OrderEvent::new(
                1,
                "SO-202601-0001",
                OrderEventKind::Created,
                serde_json::json!({}),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Delivery(_)));
        assert!(sender.events().await.is_empty());
    }
}
