use crate::application::context::PaymentStateControlContext;
use crate::application::control_calls::{
    execute_plugin_on_failure_calls, execute_plugin_on_success_calls,
};
use crate::application::retry::RetryServiceScheduler;
use crate::domain::clock::Clock;
use crate::domain::payment::{
    ObjectType, PaymentAttempt, TransactionStatus, serialize_properties,
};
use crate::domain::plugin::{PaymentControlContext, PluginRegistry};
use crate::domain::ports::PaymentDaoRef;
use crate::domain::state::ControlState;
use crate::error::{PaymentError, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Entering callback of every non-INIT state.
///
/// Persists the attempt in its new state, then notifies the control plugins:
/// `on_success_call` when the gateway accepted the transaction, otherwise
/// `on_failure_call`, which may schedule a retry on its own when the state
/// machine did not.
pub struct DefaultControlCompleted {
    dao: PaymentDaoRef,
    registry: Arc<PluginRegistry>,
    retry_scheduler: Arc<dyn RetryServiceScheduler>,
    clock: Arc<dyn Clock>,
}

impl DefaultControlCompleted {
    pub fn new(
        dao: PaymentDaoRef,
        registry: Arc<PluginRegistry>,
        retry_scheduler: Arc<dyn RetryServiceScheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            dao,
            registry,
            retry_scheduler,
            clock,
        }
    }

    /// Plugin notification runs even when persisting the attempt failed; the
    /// persistence error is returned afterwards.
    pub async fn entering_state(
        &self,
        state: ControlState,
        context: &mut PaymentStateControlContext,
    ) -> Result<()> {
        let persisted = self.persist_attempt(state, context).await;

        let success = context.is_success();
        let plugin_context = context.plugin_context(success);
        let notified = if success {
            execute_plugin_on_success_calls(
                &self.registry,
                &context.payment_control_plugin_names,
                &plugin_context,
                &context.properties,
            )
            .await;
            Ok(())
        } else {
            self.complete_failure(state, context, &plugin_context).await
        };

        persisted.and(notified)
    }

    async fn persist_attempt(
        &self,
        state: ControlState,
        context: &mut PaymentStateControlContext,
    ) -> Result<()> {
        let now = self.clock.utc_now();
        match (state, context.attempt_id) {
            (ControlState::Retried | ControlState::Aborted, None) => {
                let attempt = PaymentAttempt {
                    id: Uuid::new_v4(),
                    account_id: context.account_id,
                    payment_method_id: context.payment_method_id,
                    created_date: now,
                    updated_date: now,
                    payment_external_key: context.payment_external_key.clone(),
                    transaction_id: context.transaction_id,
                    transaction_external_key: context.payment_transaction_external_key.clone(),
                    transaction_type: context.transaction_type,
                    state_name: state,
                    amount: context.amount,
                    currency: context.currency.clone(),
                    plugin_names: context.payment_control_plugin_names.clone(),
                    plugin_properties: serialize_properties(&context.properties)?,
                    account_record_id: context.internal_call_context.account_record_id,
                    tenant_record_id: context.internal_call_context.tenant_record_id,
                };
                let attempt = self
                    .dao
                    .insert_payment_attempt_with_properties(attempt, &context.internal_call_context)
                    .await?;
                debug!(attempt_id = %attempt.id, %state, "Persisted payment attempt");
                context.attempt_id = Some(attempt.id);
            }
            (_, Some(attempt_id)) => {
                self.dao
                    .update_payment_attempt(
                        attempt_id,
                        context.transaction_id,
                        ControlState::Init,
                        state,
                        now,
                        &context.internal_call_context,
                    )
                    .await?;
            }
            (_, None) => {}
        }
        Ok(())
    }

    async fn complete_failure(
        &self,
        state: ControlState,
        context: &mut PaymentStateControlContext,
        plugin_context: &PaymentControlContext,
    ) -> Result<()> {
        let Some(retry_date) = execute_plugin_on_failure_calls(
            &self.registry,
            &context.payment_control_plugin_names,
            plugin_context,
            &context.properties,
        )
        .await
        else {
            return Ok(());
        };

        if self.is_unknown_transaction(context).await? {
            info!(
                transaction_external_key = %context.payment_transaction_external_key,
                "Transaction outcome is unknown, leaving it to the janitor"
            );
            return Ok(());
        }
        // The RetryScheduled entering callback owns this case
        if state == ControlState::Retried && context.retry_date.is_some() {
            return Ok(());
        }
        let Some(attempt_id) = context.attempt_id else {
            warn!(
                transaction_external_key = %context.payment_transaction_external_key,
                "No persisted attempt to retry"
            );
            return Ok(());
        };

        let updated = self
            .dao
            .update_payment_attempt(
                attempt_id,
                context.transaction_id,
                state,
                ControlState::Retried,
                self.clock.utc_now(),
                &context.internal_call_context,
            )
            .await;
        match updated {
            Ok(()) => {}
            Err(PaymentError::StaleAttemptState { actual, .. }) => {
                warn!(
                    %attempt_id,
                    expected = %state,
                    %actual,
                    "Payment attempt was moved by another writer, not scheduling retry"
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        self.retry_scheduler
            .schedule_retry(
                ObjectType::PaymentAttempt,
                attempt_id,
                context.internal_call_context.user_token,
                context.internal_call_context.tenant_record_id,
                &context.payment_control_plugin_names,
                retry_date,
            )
            .await?;
        context.retry_date = Some(retry_date);
        info!(%attempt_id, %retry_date, from = %state, "Payment attempt moved to RETRIED by control plugins");
        Ok(())
    }

    /// Whether the outcome of the current transaction is unknown. Without a
    /// current transaction, the stored transactions sharing its external key
    /// and account are checked instead.
    async fn is_unknown_transaction(&self, context: &PaymentStateControlContext) -> Result<bool> {
        if let Some(transaction) = &context.current_transaction {
            return Ok(transaction.status == TransactionStatus::Unknown);
        }
        let account_record_id = context.internal_call_context.account_record_id;
        let transactions = self
            .dao
            .get_payment_transactions_by_external_key(
                &context.payment_transaction_external_key,
                &context.internal_call_context,
            )
            .await?;
        Ok(transactions.iter().any(|tx| {
            tx.status == TransactionStatus::Unknown && tx.account_record_id == account_record_id
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::ClockMock;
    use crate::domain::payment::{
        InternalCallContext, PaymentRequest, PluginProperty, TransactionType,
    };
    use crate::domain::plugin::{ControlPlugin, OnFailureResult, RoutingError};
    use crate::domain::ports::PaymentDao;
    use crate::infrastructure::in_memory::InMemoryPaymentDao;
    use crate::infrastructure::in_memory::fixtures::transaction;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeDelta, Utc};
    use rust_decimal_macros::dec;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingScheduler {
        scheduled: Mutex<Vec<(Uuid, DateTime<Utc>)>>,
    }

    impl RecordingScheduler {
        fn scheduled(&self) -> Vec<(Uuid, DateTime<Utc>)> {
            self.scheduled.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RetryServiceScheduler for RecordingScheduler {
        async fn schedule_retry(
            &self,
            _object_type: ObjectType,
            object_id: Uuid,
            _user_token: Uuid,
            _tenant_record_id: u64,
            _plugin_names: &[String],
            retry_date: DateTime<Utc>,
        ) -> Result<()> {
            self.scheduled.lock().unwrap().push((object_id, retry_date));
            Ok(())
        }
    }

    struct FixedPlugin {
        verdict: std::result::Result<Option<DateTime<Utc>>, RoutingError>,
        successes: AtomicUsize,
        failures: AtomicUsize,
    }

    impl FixedPlugin {
        fn new(verdict: std::result::Result<Option<DateTime<Utc>>, RoutingError>) -> Arc<Self> {
            Arc::new(Self {
                verdict,
                successes: AtomicUsize::new(0),
                failures: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ControlPlugin for FixedPlugin {
        async fn on_success_call(
            &self,
            _context: &PaymentControlContext,
            _properties: &[PluginProperty],
        ) -> std::result::Result<(), RoutingError> {
            self.successes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_failure_call(
            &self,
            _context: &PaymentControlContext,
            _properties: &[PluginProperty],
        ) -> std::result::Result<OnFailureResult, RoutingError> {
            self.failures.fetch_add(1, Ordering::SeqCst);
            self.verdict
                .clone()
                .map(|next_retry_date| OnFailureResult { next_retry_date })
        }
    }

    struct Harness {
        dao: Arc<InMemoryPaymentDao>,
        scheduler: Arc<RecordingScheduler>,
        completed: DefaultControlCompleted,
        now: DateTime<Utc>,
        plugin_names: Vec<String>,
    }

    async fn harness(plugins: Vec<(&str, Arc<FixedPlugin>)>) -> Harness {
        let now = Utc::now();
        let dao = Arc::new(InMemoryPaymentDao::new());
        let scheduler = Arc::new(RecordingScheduler::default());
        let registry = Arc::new(PluginRegistry::new());
        let mut plugin_names = Vec::new();
        for (name, plugin) in plugins {
            registry.register(name, plugin).await;
            plugin_names.push(name.to_string());
        }
        let completed = DefaultControlCompleted::new(
            dao.clone(),
            registry,
            scheduler.clone(),
            Arc::new(ClockMock::new(now)),
        );
        Harness {
            dao,
            scheduler,
            completed,
            now,
            plugin_names,
        }
    }

    fn state_context(plugin_names: Vec<String>, status: Option<TransactionStatus>) -> PaymentStateControlContext {
        let request = PaymentRequest {
            transaction_type: TransactionType::Purchase,
            account_id: Uuid::new_v4(),
            payment_method_id: Uuid::new_v4(),
            payment_id: None,
            payment_external_key: "tx-1-payment".to_string(),
            transaction_external_key: "tx-1".to_string(),
            amount: dec!(10.0),
            currency: "USD".to_string(),
            properties: vec![PluginProperty::new("source", "test")],
            plugin_names,
            is_api_payment: true,
        };
        let mut context = PaymentStateControlContext::from_request(
            request,
            InternalCallContext::new(1, Some(10), Uuid::new_v4()),
        );
        if let Some(status) = status {
            let tx = transaction("tx-1", status);
            context.transaction_id = Some(tx.id);
            context.payment_id = Some(tx.payment_id);
            context.current_transaction = Some(tx);
        }
        context
    }

    #[tokio::test]
    async fn test_aborted_failure_schedules_earliest_retry() {
        let now = Utc::now();
        let h = harness(vec![
            ("a", FixedPlugin::new(Ok(Some(now + TimeDelta::minutes(10))))),
            ("b", FixedPlugin::new(Ok(None))),
            ("c", FixedPlugin::new(Ok(Some(now + TimeDelta::minutes(5))))),
            ("d", FixedPlugin::new(Ok(Some(now + TimeDelta::minutes(20))))),
        ])
        .await;
        let mut ctx = state_context(h.plugin_names.clone(), Some(TransactionStatus::Failed));

        h.completed
            .entering_state(ControlState::Aborted, &mut ctx)
            .await
            .unwrap();

        let attempt_id = ctx.attempt_id.unwrap();
        assert_eq!(
            h.scheduler.scheduled(),
            vec![(attempt_id, now + TimeDelta::minutes(5))]
        );
        let attempt = h
            .dao
            .get_payment_attempt(attempt_id, &ctx.internal_call_context)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempt.state_name, ControlState::Retried);
        assert_eq!(ctx.retry_date, Some(now + TimeDelta::minutes(5)));
    }

    #[tokio::test]
    async fn test_success_only_notifies_success() {
        let plugin = FixedPlugin::new(Ok(Some(Utc::now())));
        let h = harness(vec![("a", plugin.clone())]).await;
        let mut ctx = state_context(h.plugin_names.clone(), Some(TransactionStatus::Success));

        h.completed
            .entering_state(ControlState::Success, &mut ctx)
            .await
            .unwrap();

        assert_eq!(plugin.successes.load(Ordering::SeqCst), 1);
        assert_eq!(plugin.failures.load(Ordering::SeqCst), 0);
        assert!(h.scheduler.scheduled().is_empty());
        // A first-try success leaves no attempt behind
        assert!(ctx.attempt_id.is_none());
    }

    #[tokio::test]
    async fn test_pending_counts_as_success() {
        let plugin = FixedPlugin::new(Ok(None));
        let h = harness(vec![("a", plugin.clone())]).await;
        let mut ctx = state_context(h.plugin_names.clone(), Some(TransactionStatus::Pending));

        h.completed
            .entering_state(ControlState::Success, &mut ctx)
            .await
            .unwrap();
        assert_eq!(plugin.successes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_plugin_error_keeps_partial_candidate() {
        let now = Utc::now();
        let h = harness(vec![
            ("a", FixedPlugin::new(Ok(Some(now + TimeDelta::minutes(15))))),
            ("b", FixedPlugin::new(Err(RoutingError("unavailable".to_string())))),
            ("c", FixedPlugin::new(Ok(Some(now + TimeDelta::minutes(1))))),
        ])
        .await;
        let mut ctx = state_context(h.plugin_names.clone(), Some(TransactionStatus::Failed));

        h.completed
            .entering_state(ControlState::Aborted, &mut ctx)
            .await
            .unwrap();

        let scheduled = h.scheduler.scheduled();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].1, now + TimeDelta::minutes(15));
    }

    #[tokio::test]
    async fn test_unknown_transaction_is_left_to_janitor() {
        let h = harness(vec![("a", FixedPlugin::new(Ok(Some(Utc::now()))))]).await;
        let mut ctx = state_context(h.plugin_names.clone(), Some(TransactionStatus::Unknown));

        h.completed
            .entering_state(ControlState::Aborted, &mut ctx)
            .await
            .unwrap();

        assert!(h.scheduler.scheduled().is_empty());
        let attempt = h
            .dao
            .get_payment_attempt(ctx.attempt_id.unwrap(), &ctx.internal_call_context)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempt.state_name, ControlState::Aborted);
    }

    #[tokio::test]
    async fn test_no_candidate_means_no_retry() {
        let h = harness(vec![("a", FixedPlugin::new(Ok(None)))]).await;
        let mut ctx = state_context(h.plugin_names.clone(), Some(TransactionStatus::Failed));

        h.completed
            .entering_state(ControlState::Aborted, &mut ctx)
            .await
            .unwrap();
        assert!(h.scheduler.scheduled().is_empty());
        assert!(ctx.retry_date.is_none());
    }

    #[tokio::test]
    async fn test_retried_with_retry_date_is_not_scheduled_twice() {
        let h = harness(vec![("a", FixedPlugin::new(Ok(Some(Utc::now()))))]).await;
        let mut ctx = state_context(h.plugin_names.clone(), Some(TransactionStatus::Failed));
        ctx.retry_date = Some(h.now + TimeDelta::hours(1));

        h.completed
            .entering_state(ControlState::Retried, &mut ctx)
            .await
            .unwrap();

        assert!(h.scheduler.scheduled().is_empty());
        let attempt = h
            .dao
            .get_payment_attempt(ctx.attempt_id.unwrap(), &ctx.internal_call_context)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempt.state_name, ControlState::Retried);
    }

    #[tokio::test]
    async fn test_stale_attempt_is_not_scheduled() {
        let h = harness(vec![("a", FixedPlugin::new(Ok(Some(Utc::now()))))]).await;
        let mut ctx = state_context(h.plugin_names.clone(), Some(TransactionStatus::PluginFailure));

        // A resumed attempt already completed by another writer
        let mut attempt = crate::infrastructure::in_memory::fixtures::attempt("tx-1", ControlState::Init);
        attempt.tenant_record_id = ctx.internal_call_context.tenant_record_id;
        let attempt = h
            .dao
            .insert_payment_attempt_with_properties(attempt, &ctx.internal_call_context)
            .await
            .unwrap();
        ctx.attempt_id = Some(attempt.id);
        h.dao
            .update_payment_attempt(
                attempt.id,
                None,
                ControlState::Init,
                ControlState::Success,
                h.now,
                &ctx.internal_call_context,
            )
            .await
            .unwrap();

        let result = h.completed.entering_state(ControlState::Aborted, &mut ctx).await;

        // Persisting INIT -> ABORTED is stale too; the error surfaces after
        // the plugins were consulted, and no retry is scheduled
        assert!(matches!(result, Err(PaymentError::StaleAttemptState { .. })));
        assert!(h.scheduler.scheduled().is_empty());
    }

    #[tokio::test]
    async fn test_stored_unknown_transaction_blocks_fallback() {
        let h = harness(vec![("a", FixedPlugin::new(Ok(Some(Utc::now()))))]).await;
        let mut ctx = state_context(h.plugin_names.clone(), None);
        h.dao
            .insert_payment_transaction(
                transaction("tx-1", TransactionStatus::Unknown),
                &ctx.internal_call_context,
            )
            .await
            .unwrap();

        h.completed
            .entering_state(ControlState::Aborted, &mut ctx)
            .await
            .unwrap();
        assert!(h.scheduler.scheduled().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_transaction_of_other_account_does_not_block() {
        let h = harness(vec![("a", FixedPlugin::new(Ok(Some(Utc::now()))))]).await;
        let mut ctx = state_context(h.plugin_names.clone(), None);
        let mut other = transaction("tx-1", TransactionStatus::Unknown);
        other.account_record_id = Some(99);
        h.dao
            .insert_payment_transaction(other, &ctx.internal_call_context)
            .await
            .unwrap();

        h.completed
            .entering_state(ControlState::Aborted, &mut ctx)
            .await
            .unwrap();
        assert_eq!(h.scheduler.scheduled().len(), 1);
    }
}
