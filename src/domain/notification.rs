//! Contract of the delayed-delivery notification queue.
//!
//! Queues are keyed by (service name, queue name). A producer records a
//! notification with a future effective date; once that date has passed and
//! the queue is started, the registered handler receives it. Delivery is
//! at-least-once, so handlers must tolerate duplicates.

use crate::domain::payment::ObjectType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("notification queue {service_name}:{queue_name} already exists")]
    AlreadyExists {
        service_name: String,
        queue_name: String,
    },
    #[error("no such notification queue {service_name}:{queue_name}")]
    NoSuchNotificationQueue {
        service_name: String,
        queue_name: String,
    },
    #[error("failed to record notification: {0}")]
    RecordFailed(String),
}

/// Reconciliation work for the janitor.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct JanitorNotificationKey {
    pub task_name: String,
    pub transaction_id: Uuid,
    /// 1-based count of reconciliation passes for this transaction.
    pub attempt_number: u32,
}

/// Resume a payment attempt through the control state machine.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PaymentRetryNotificationKey {
    pub object_type: ObjectType,
    pub attempt_id: Uuid,
    pub plugin_names: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(tag = "type", content = "key")]
pub enum NotificationEvent {
    Janitor(JanitorNotificationKey),
    PaymentRetry(PaymentRetryNotificationKey),
}

impl NotificationEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            NotificationEvent::Janitor(_) => "JanitorNotificationKey",
            NotificationEvent::PaymentRetry(_) => "PaymentRetryNotificationKey",
        }
    }
}

/// Callback registered with a queue. Implementations must not fail: anything
/// that goes wrong is logged.
#[async_trait]
pub trait NotificationQueueHandler: Send + Sync {
    async fn handle_ready_notification(
        &self,
        event: &NotificationEvent,
        event_date: DateTime<Utc>,
        user_token: Uuid,
        account_record_id: Option<u64>,
        tenant_record_id: u64,
    );
}

#[async_trait]
pub trait NotificationQueue: Send + Sync {
    fn service_name(&self) -> &str;

    fn queue_name(&self) -> &str;

    async fn record_future_notification(
        &self,
        effective_date: DateTime<Utc>,
        event: NotificationEvent,
        user_token: Uuid,
        account_record_id: Option<u64>,
        tenant_record_id: u64,
    ) -> Result<(), QueueError>;

    async fn start_queue(&self);

    async fn stop_queue(&self);

    fn is_started(&self) -> bool;
}

pub type NotificationQueueRef = Arc<dyn NotificationQueue>;

#[async_trait]
pub trait NotificationQueueService: Send + Sync {
    async fn create_notification_queue(
        &self,
        service_name: &str,
        queue_name: &str,
        handler: Arc<dyn NotificationQueueHandler>,
    ) -> Result<NotificationQueueRef, QueueError>;

    async fn delete_notification_queue(
        &self,
        service_name: &str,
        queue_name: &str,
    ) -> Result<(), QueueError>;
}
