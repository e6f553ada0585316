use crate::config::JanitorConfig;
use crate::domain::clock::Clock;
use crate::domain::notification::{JanitorNotificationKey, NotificationEvent, NotificationQueueRef};
use crate::domain::payment::{
    InternalCallContext, PaymentInternalEvent, PaymentTransaction, TransactionStatus,
    TransactionStatusUpdate,
};
use crate::domain::ports::{PaymentDaoRef, PaymentPluginApiRef};
use crate::error::{PaymentError, Result};
use chrono::TimeDelta;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Reconciles transactions left PENDING or UNKNOWN with the gateway.
///
/// Every incomplete transaction gets a janitor notification; each pass asks
/// the gateway for its view and records it when the gateway knows better.
/// Passes follow the configured delays and stop once they are exhausted.
pub struct IncompletePaymentTransactionTask {
    dao: PaymentDaoRef,
    gateway: PaymentPluginApiRef,
    clock: Arc<dyn Clock>,
    retry_delays: Vec<TimeDelta>,
    janitor_queue: OnceLock<NotificationQueueRef>,
    stopped: AtomicBool,
}

impl IncompletePaymentTransactionTask {
    pub const TASK_NAME: &'static str = "IncompletePaymentTransactionTask";

    pub fn new(
        dao: PaymentDaoRef,
        gateway: PaymentPluginApiRef,
        clock: Arc<dyn Clock>,
        config: &JanitorConfig,
    ) -> Self {
        Self {
            dao,
            gateway,
            clock,
            retry_delays: config.retry_delays(),
            janitor_queue: OnceLock::new(),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn task_name(&self) -> &'static str {
        Self::TASK_NAME
    }

    pub fn attach_janitor_queue(&self, queue: NotificationQueueRef) {
        if self.janitor_queue.set(queue).is_err() {
            warn!(task = Self::TASK_NAME, "Janitor queue was already attached");
        }
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Schedules the first reconciliation pass of an incomplete transaction.
    pub async fn process_payment_event(&self, event: &PaymentInternalEvent) -> Result<()> {
        if self.is_stopped() {
            debug!(
                transaction_id = %event.transaction_id,
                "Janitor task is stopped, ignoring payment event"
            );
            return Ok(());
        }
        if !event.status.is_incomplete() {
            return Ok(());
        }
        let context = InternalCallContext::new(
            event.tenant_record_id,
            event.account_record_id,
            event.user_token,
        );
        self.schedule_pass(event.transaction_id, 1, &context).await
    }

    /// Runs one reconciliation pass. Failures are logged, never returned.
    pub async fn process_notification(
        &self,
        key: &JanitorNotificationKey,
        user_token: Uuid,
        account_record_id: Option<u64>,
        tenant_record_id: u64,
    ) {
        if self.is_stopped() {
            info!(
                transaction_id = %key.transaction_id,
                "Janitor task is stopped, dropping notification"
            );
            return;
        }
        let context = InternalCallContext::new(tenant_record_id, account_record_id, user_token);
        if let Err(e) = self.reconcile(key, &context).await {
            error!(
                transaction_id = %key.transaction_id,
                attempt_number = key.attempt_number,
                error = %e,
                "Janitor failed to reconcile transaction"
            );
        }
    }

    async fn reconcile(&self, key: &JanitorNotificationKey, context: &InternalCallContext) -> Result<()> {
        let Some(transaction) = self
            .dao
            .get_payment_transaction(key.transaction_id, context)
            .await?
        else {
            warn!(transaction_id = %key.transaction_id, "Janitor could not find transaction");
            return Ok(());
        };
        if !transaction.status.is_incomplete() {
            debug!(
                transaction_id = %transaction.id,
                status = %transaction.status,
                "Transaction already complete"
            );
            return Ok(());
        }

        let Some(status) = self.refresh_status(&transaction, context).await? else {
            return Ok(());
        };
        if status.is_incomplete() {
            self.schedule_pass(transaction.id, key.attempt_number + 1, context)
                .await?;
        }
        Ok(())
    }

    /// Applies the gateway's view of the transaction and returns the
    /// resulting status, or `None` when another writer changed it first.
    async fn refresh_status(
        &self,
        transaction: &PaymentTransaction,
        context: &InternalCallContext,
    ) -> Result<Option<TransactionStatus>> {
        let info = match self.gateway.get_payment_info(transaction).await {
            Ok(Some(info)) => info,
            Ok(None) => return Ok(Some(transaction.status)),
            Err(e) => {
                warn!(
                    transaction_id = %transaction.id,
                    error = %e,
                    "Gateway could not report transaction status"
                );
                return Ok(Some(transaction.status));
            }
        };
        if info.status == TransactionStatus::Unknown || info.status == transaction.status {
            return Ok(Some(transaction.status));
        }

        let success = info.status.is_success();
        let update = TransactionStatusUpdate {
            status: info.status,
            processed_amount: success.then(|| info.processed_amount.unwrap_or(transaction.amount)),
            processed_currency: success.then(|| {
                info.processed_currency
                    .clone()
                    .unwrap_or_else(|| transaction.currency.clone())
            }),
            gateway_error: info.gateway_error.clone(),
            updated_date: self.clock.utc_now(),
        };
        match self
            .dao
            .update_payment_transaction_status(transaction.id, transaction.status, update, context)
            .await
        {
            Ok(()) => {
                info!(
                    transaction_id = %transaction.id,
                    from = %transaction.status,
                    to = %info.status,
                    "Janitor updated transaction status"
                );
                Ok(Some(info.status))
            }
            Err(PaymentError::StaleTransactionStatus { actual, .. }) => {
                info!(
                    transaction_id = %transaction.id,
                    %actual,
                    "Transaction was updated concurrently, skipping"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Records pass `attempt_number` (1-based); gives up once the
    /// configured delays are exhausted.
    async fn schedule_pass(
        &self,
        transaction_id: Uuid,
        attempt_number: u32,
        context: &InternalCallContext,
    ) -> Result<()> {
        let Some(delay) = self
            .retry_delays
            .get(attempt_number.saturating_sub(1) as usize)
        else {
            warn!(
                %transaction_id,
                passes = attempt_number.saturating_sub(1),
                "Janitor giving up on incomplete transaction"
            );
            return Ok(());
        };
        let queue = self
            .janitor_queue
            .get()
            .ok_or(PaymentError::NotInitialized("Janitor"))?;
        let effective_date = self.clock.utc_now() + *delay;
        queue
            .record_future_notification(
                effective_date,
                NotificationEvent::Janitor(JanitorNotificationKey {
                    task_name: Self::TASK_NAME.to_string(),
                    transaction_id,
                    attempt_number,
                }),
                context.user_token,
                context.account_record_id,
                context.tenant_record_id,
            )
            .await?;
        debug!(%transaction_id, attempt_number, %effective_date, "Scheduled janitor pass");
        Ok(())
    }
}
