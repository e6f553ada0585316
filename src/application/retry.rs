use crate::application::lifecycle::{Lifecycle, LifecycleState};
use crate::application::runner::PluginControlPaymentAutomatonRunner;
use crate::domain::notification::{
    NotificationEvent, NotificationQueueHandler, NotificationQueueRef, NotificationQueueService,
    PaymentRetryNotificationKey,
};
use crate::domain::payment::{InternalCallContext, ObjectType};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, OnceLock, Weak};
use tracing::{error, info, warn};
use uuid::Uuid;

pub const PAYMENT_SERVICE_NAME: &str = "payment-service";
pub const RETRY_QUEUE_NAME: &str = "plugin-control-retry";

/// Producer side of payment retries.
///
/// Enqueue failures are returned to the caller: a dropped schedule would
/// silently stall the payment.
#[async_trait]
pub trait RetryServiceScheduler: Send + Sync {
    async fn schedule_retry(
        &self,
        object_type: ObjectType,
        object_id: Uuid,
        user_token: Uuid,
        tenant_record_id: u64,
        plugin_names: &[String],
        retry_date: DateTime<Utc>,
    ) -> Result<()>;
}

/// Owns the retry queue and resumes attempts through the control state
/// machine when their retry date is reached.
pub struct PluginControlledPaymentRetryService {
    queue_service: Arc<dyn NotificationQueueService>,
    retry_queue: OnceLock<NotificationQueueRef>,
    lifecycle: Lifecycle,
}

impl PluginControlledPaymentRetryService {
    pub fn new(queue_service: Arc<dyn NotificationQueueService>) -> Self {
        Self {
            queue_service,
            retry_queue: OnceLock::new(),
            lifecycle: Lifecycle::new("PluginControlledPaymentRetryService"),
        }
    }

    /// Registers the retry queue. The runner is held weakly since it holds
    /// this service as its scheduler.
    pub async fn initialize(&self, runner: Weak<PluginControlPaymentAutomatonRunner>) -> Result<()> {
        self.lifecycle
            .initialize(|| async move {
                let handler = Arc::new(RetryQueueHandler { runner });
                let queue = self
                    .queue_service
                    .create_notification_queue(PAYMENT_SERVICE_NAME, RETRY_QUEUE_NAME, handler)
                    .await?;
                if self.retry_queue.set(queue).is_err() {
                    warn!("Retry queue was already attached");
                }
                Ok(())
            })
            .await
    }

    pub async fn start(&self) -> Result<()> {
        self.lifecycle
            .start(|| async {
                if let Some(queue) = self.retry_queue.get() {
                    queue.start_queue().await;
                }
            })
            .await
    }

    pub async fn stop(&self) -> Result<()> {
        self.lifecycle
            .stop(|| async {
                if let Some(queue) = self.retry_queue.get() {
                    queue.stop_queue().await;
                    self.queue_service
                        .delete_notification_queue(PAYMENT_SERVICE_NAME, RETRY_QUEUE_NAME)
                        .await?;
                }
                Ok(())
            })
            .await
    }

    pub async fn state(&self) -> LifecycleState {
        self.lifecycle.current().await
    }
}

#[async_trait]
impl RetryServiceScheduler for PluginControlledPaymentRetryService {
    async fn schedule_retry(
        &self,
        object_type: ObjectType,
        object_id: Uuid,
        user_token: Uuid,
        tenant_record_id: u64,
        plugin_names: &[String],
        retry_date: DateTime<Utc>,
    ) -> Result<()> {
        let queue = self
            .retry_queue
            .get()
            .ok_or(PaymentError::NotInitialized("PluginControlledPaymentRetryService"))?;
        let key = PaymentRetryNotificationKey {
            object_type,
            attempt_id: object_id,
            plugin_names: plugin_names.to_vec(),
        };
        queue
            .record_future_notification(
                retry_date,
                NotificationEvent::PaymentRetry(key),
                user_token,
                None,
                tenant_record_id,
            )
            .await?;
        info!(attempt_id = %object_id, %retry_date, "Scheduled payment retry");
        Ok(())
    }
}

struct RetryQueueHandler {
    runner: Weak<PluginControlPaymentAutomatonRunner>,
}

#[async_trait]
impl NotificationQueueHandler for RetryQueueHandler {
    async fn handle_ready_notification(
        &self,
        event: &NotificationEvent,
        _event_date: DateTime<Utc>,
        user_token: Uuid,
        account_record_id: Option<u64>,
        tenant_record_id: u64,
    ) {
        let NotificationEvent::PaymentRetry(key) = event else {
            error!(
                "Retry service received an unexpected event type {}",
                event.type_name()
            );
            return;
        };
        let Some(runner) = self.runner.upgrade() else {
            warn!(attempt_id = %key.attempt_id, "Payment runner is gone, dropping retry");
            return;
        };

        let context = InternalCallContext::new(tenant_record_id, account_record_id, user_token);
        match runner
            .resume(key.attempt_id, key.plugin_names.clone(), context)
            .await
        {
            Ok(Some(state_context)) => {
                info!(
                    attempt_id = %key.attempt_id,
                    transaction_external_key = %state_context.payment_transaction_external_key,
                    "Retried payment attempt"
                );
            }
            Ok(None) => {}
            Err(e) => {
                error!(attempt_id = %key.attempt_id, error = %e, "Failed to retry payment attempt");
            }
        }
    }
}
