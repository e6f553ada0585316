//! Background reconciliation of incomplete payment transactions.

mod incomplete_transaction;

pub use incomplete_transaction::IncompletePaymentTransactionTask;

use crate::application::lifecycle::{Lifecycle, LifecycleState};
use crate::application::retry::PAYMENT_SERVICE_NAME;
use crate::domain::notification::{
    NotificationEvent, NotificationQueueHandler, NotificationQueueRef, NotificationQueueService,
};
use crate::domain::payment::PaymentInternalEvent;
use crate::domain::ports::PaymentEventListener;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, warn};
use uuid::Uuid;

pub const QUEUE_NAME: &str = "janitor";

/// Owns the janitor queue and routes its notifications to the task.
///
/// Not restartable: once stopped, `start` is a logged no-op.
pub struct Janitor {
    queue_service: Arc<dyn NotificationQueueService>,
    task: Arc<IncompletePaymentTransactionTask>,
    janitor_queue: OnceLock<NotificationQueueRef>,
    lifecycle: Lifecycle,
}

impl Janitor {
    pub fn new(
        queue_service: Arc<dyn NotificationQueueService>,
        task: Arc<IncompletePaymentTransactionTask>,
    ) -> Self {
        Self {
            queue_service,
            task,
            janitor_queue: OnceLock::new(),
            lifecycle: Lifecycle::new("Janitor"),
        }
    }

    pub async fn initialize(&self) -> Result<()> {
        self.lifecycle
            .initialize(|| async {
                let handler = Arc::new(JanitorQueueHandler {
                    task: self.task.clone(),
                });
                let queue = self
                    .queue_service
                    .create_notification_queue(PAYMENT_SERVICE_NAME, QUEUE_NAME, handler)
                    .await?;
                self.task.attach_janitor_queue(queue.clone());
                if self.janitor_queue.set(queue).is_err() {
                    warn!("Janitor queue was already attached");
                }
                Ok(())
            })
            .await
    }

    pub async fn start(&self) -> Result<()> {
        self.lifecycle
            .start(|| async {
                if let Some(queue) = self.janitor_queue.get() {
                    queue.start_queue().await;
                }
            })
            .await
    }

    /// Stops the task, then stops and deletes the queue.
    pub async fn stop(&self) -> Result<()> {
        self.lifecycle
            .stop(|| async {
                self.task.stop();
                if let Some(queue) = self.janitor_queue.get() {
                    queue.stop_queue().await;
                    self.queue_service
                        .delete_notification_queue(PAYMENT_SERVICE_NAME, QUEUE_NAME)
                        .await?;
                }
                Ok(())
            })
            .await
    }

    pub async fn state(&self) -> LifecycleState {
        self.lifecycle.current().await
    }

    pub async fn process_payment_event(&self, event: &PaymentInternalEvent) -> Result<()> {
        if self.janitor_queue.get().is_none() {
            return Err(PaymentError::NotInitialized("Janitor"));
        }
        self.task.process_payment_event(event).await
    }
}

#[async_trait]
impl PaymentEventListener for Janitor {
    async fn on_payment_event(&self, event: &PaymentInternalEvent) {
        if let Err(e) = self.process_payment_event(event).await {
            warn!(
                transaction_id = %event.transaction_id,
                error = %e,
                "Janitor failed to process payment event"
            );
        }
    }
}

struct JanitorQueueHandler {
    task: Arc<IncompletePaymentTransactionTask>,
}

#[async_trait]
impl NotificationQueueHandler for JanitorQueueHandler {
    async fn handle_ready_notification(
        &self,
        event: &NotificationEvent,
        _event_date: DateTime<Utc>,
        user_token: Uuid,
        account_record_id: Option<u64>,
        tenant_record_id: u64,
    ) {
        let NotificationEvent::Janitor(key) = event else {
            error!(
                "Janitor service received an unexpected event type {}",
                event.type_name()
            );
            return;
        };
        if key.task_name != self.task.task_name() {
            debug!(task_name = %key.task_name, "Ignoring janitor notification for another task");
            return;
        }
        self.task
            .process_notification(key, user_token, account_record_id, tenant_record_id)
            .await;
    }
}
