use crate::application::completion::DefaultControlCompleted;
use crate::application::context::PaymentStateControlContext;
use crate::application::control_calls::{
    execute_plugin_on_failure_calls, execute_plugin_prior_calls,
};
use crate::application::retry::RetryServiceScheduler;
use crate::domain::clock::Clock;
use crate::domain::payment::{
    InternalCallContext, ObjectType, PaymentInternalEvent, PaymentRequest, PaymentTransaction,
    TransactionStatus, deserialize_properties,
};
use crate::domain::plugin::PluginRegistry;
use crate::domain::ports::{
    GatewayRequest, GatewayTransactionInfo, PaymentDaoRef, PaymentEventListener,
    PaymentPluginApiRef,
};
use crate::domain::state::{ControlState, EnteringCallback, LeavingCallback, OperationResult};
use crate::error::{PaymentError, Result};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Drives payment requests through the control state machine.
///
/// A run leaves INIT or RETRIED through the control operation and enters the
/// state picked by `ControlState::transition`, executing the leaving and
/// entering callbacks of the states involved.
pub struct PluginControlPaymentAutomatonRunner {
    dao: PaymentDaoRef,
    gateway: PaymentPluginApiRef,
    registry: Arc<PluginRegistry>,
    retry_scheduler: Arc<dyn RetryServiceScheduler>,
    clock: Arc<dyn Clock>,
    completed: DefaultControlCompleted,
    event_listener: Option<Arc<dyn PaymentEventListener>>,
}

impl PluginControlPaymentAutomatonRunner {
    pub fn new(
        dao: PaymentDaoRef,
        gateway: PaymentPluginApiRef,
        registry: Arc<PluginRegistry>,
        retry_scheduler: Arc<dyn RetryServiceScheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let completed = DefaultControlCompleted::new(
            dao.clone(),
            registry.clone(),
            retry_scheduler.clone(),
            clock.clone(),
        );
        Self {
            dao,
            gateway,
            registry,
            retry_scheduler,
            clock,
            completed,
            event_listener: None,
        }
    }

    /// Receives a `PaymentInternalEvent` after every gateway transaction.
    pub fn with_event_listener(mut self, listener: Arc<dyn PaymentEventListener>) -> Self {
        self.event_listener = Some(listener);
        self
    }

    /// Runs a new request from INIT.
    pub async fn run(
        &self,
        request: PaymentRequest,
        context: InternalCallContext,
    ) -> Result<PaymentStateControlContext> {
        request.validate()?;
        let state_context = PaymentStateControlContext::from_request(request, context);
        self.run_from(ControlState::Init, state_context).await
    }

    /// Resumes a persisted attempt from RETRIED.
    ///
    /// Returns `None` when there is nothing to do: the attempt is gone, is no
    /// longer RETRIED, or was claimed by another worker first. An empty
    /// `plugin_names` falls back to the attempt's own plugin list.
    pub async fn resume(
        &self,
        attempt_id: Uuid,
        plugin_names: Vec<String>,
        context: InternalCallContext,
    ) -> Result<Option<PaymentStateControlContext>> {
        let Some(attempt) = self.dao.get_payment_attempt(attempt_id, &context).await? else {
            warn!(%attempt_id, "Payment attempt to retry does not exist");
            return Ok(None);
        };
        if attempt.state_name != ControlState::Retried {
            info!(%attempt_id, state = %attempt.state_name, "Payment attempt is no longer RETRIED, skipping retry");
            return Ok(None);
        }

        let properties = deserialize_properties(attempt.id, &attempt.plugin_properties)?;
        let last_transaction = match attempt.transaction_id {
            Some(transaction_id) => self.dao.get_payment_transaction(transaction_id, &context).await?,
            None => None,
        };
        let plugin_names = if plugin_names.is_empty() {
            attempt.plugin_names.clone()
        } else {
            plugin_names
        };
        let internal = InternalCallContext::new(
            attempt.tenant_record_id,
            attempt.account_record_id,
            context.user_token,
        );
        let state_context = PaymentStateControlContext::from_attempt(
            &attempt,
            properties,
            plugin_names,
            last_transaction,
            internal,
        );

        match self.run_from(ControlState::Retried, state_context).await {
            Ok(state_context) => Ok(Some(state_context)),
            Err(PaymentError::StaleAttemptState { actual, .. }) => {
                info!(%attempt_id, %actual, "Payment attempt was claimed by another worker");
                Ok(None)
            }
            Err(e) => {
                error!(%attempt_id, error = %e, "Payment attempt retry failed");
                self.release_claim(attempt_id, &internal).await;
                Err(e)
            }
        }
    }

    /// Hands a claimed attempt back to RETRIED so that it can be resumed
    /// again. A no-op when the failed run already moved it out of INIT.
    async fn release_claim(&self, attempt_id: Uuid, context: &InternalCallContext) {
        match self
            .dao
            .update_payment_attempt(
                attempt_id,
                None,
                ControlState::Init,
                ControlState::Retried,
                self.clock.utc_now(),
                context,
            )
            .await
        {
            Ok(()) => info!(%attempt_id, "Released claim on payment attempt"),
            Err(PaymentError::StaleAttemptState { .. }) => {}
            Err(e) => error!(
                %attempt_id,
                error = %e,
                "Payment attempt is stuck in INIT, could not release claim"
            ),
        }
    }

    async fn run_from(
        &self,
        state: ControlState,
        mut context: PaymentStateControlContext,
    ) -> Result<PaymentStateControlContext> {
        if state.is_terminal() {
            return Err(PaymentError::InvalidTransition(state));
        }
        for callback in state.leaving_callbacks() {
            match callback {
                LeavingCallback::ControlInitiated => self.control_initiated(state, &context).await?,
            }
        }

        let result = self.execute_operation(&mut context).await?;
        let next = state.transition(result, context.retry_date.is_some())?;
        info!(
            payment_external_key = %context.payment_external_key,
            transaction_external_key = %context.payment_transaction_external_key,
            from = %state,
            to = %next,
            ?result,
            "Payment control transition"
        );

        for callback in next.entering_callbacks() {
            match callback {
                EnteringCallback::ControlCompleted => {
                    self.completed.entering_state(next, &mut context).await?
                }
                EnteringCallback::RetryScheduled => self.retry_scheduled(&context).await?,
            }
        }
        Ok(context)
    }

    /// Claims a resumed attempt by moving it back to INIT. A fresh request
    /// has no attempt yet.
    async fn control_initiated(
        &self,
        state: ControlState,
        context: &PaymentStateControlContext,
    ) -> Result<()> {
        let Some(attempt_id) = context.attempt_id else {
            return Ok(());
        };
        self.dao
            .update_payment_attempt(
                attempt_id,
                None,
                state,
                ControlState::Init,
                self.clock.utc_now(),
                &context.internal_call_context,
            )
            .await?;
        debug!(%attempt_id, from = %state, "Claimed payment attempt");
        Ok(())
    }

    async fn execute_operation(
        &self,
        context: &mut PaymentStateControlContext,
    ) -> Result<OperationResult> {
        context.retry_date = None;

        let prior = execute_plugin_prior_calls(
            &self.registry,
            &context.payment_control_plugin_names,
            &context.plugin_context(false),
            &context.properties,
        )
        .await;
        if prior.is_aborted {
            info!(
                transaction_external_key = %context.payment_transaction_external_key,
                "Payment aborted by control plugin"
            );
            return Ok(OperationResult::Failure);
        }
        if let Some(amount) = prior.adjusted_amount {
            context.amount = amount;
        }

        let payment_id = *context.payment_id.get_or_insert_with(Uuid::new_v4);
        let transaction_id = Uuid::new_v4();
        context.transaction_id = Some(transaction_id);

        let request = GatewayRequest {
            payment_id,
            transaction_id,
            transaction_external_key: context.payment_transaction_external_key.clone(),
            transaction_type: context.transaction_type,
            amount: context.amount,
            currency: context.currency.clone(),
        };
        let info = match self.gateway.process_payment(&request).await {
            Ok(info) => info,
            Err(e) => {
                warn!(
                    transaction_external_key = %request.transaction_external_key,
                    %transaction_id,
                    error = %e,
                    "Gateway call failed"
                );
                let status = if e.is_indeterminate() {
                    TransactionStatus::Unknown
                } else {
                    TransactionStatus::PluginFailure
                };
                GatewayTransactionInfo {
                    status,
                    processed_amount: None,
                    processed_currency: None,
                    gateway_error: Some(e.to_string()),
                }
            }
        };

        let transaction = self.record_transaction(context, &request, info).await?;
        let status = transaction.status;
        self.publish_event(context, &transaction).await;
        context.current_transaction = Some(transaction);

        Ok(match status {
            TransactionStatus::Success => OperationResult::Success,
            TransactionStatus::Pending => OperationResult::Pending,
            TransactionStatus::Failed => {
                context.retry_date = execute_plugin_on_failure_calls(
                    &self.registry,
                    &context.payment_control_plugin_names,
                    &context.plugin_context(false),
                    &context.properties,
                )
                .await;
                OperationResult::Failure
            }
            TransactionStatus::Unknown | TransactionStatus::PluginFailure => {
                OperationResult::Exception
            }
        })
    }

    async fn record_transaction(
        &self,
        context: &PaymentStateControlContext,
        request: &GatewayRequest,
        info: GatewayTransactionInfo,
    ) -> Result<PaymentTransaction> {
        let now = self.clock.utc_now();
        let success = info.status.is_success();
        let transaction = PaymentTransaction {
            id: request.transaction_id,
            payment_id: request.payment_id,
            attempt_id: context.attempt_id,
            transaction_external_key: request.transaction_external_key.clone(),
            transaction_type: request.transaction_type,
            status: info.status,
            amount: request.amount,
            currency: request.currency.clone(),
            processed_amount: success.then(|| info.processed_amount.unwrap_or(request.amount)),
            processed_currency: success
                .then(|| info.processed_currency.unwrap_or_else(|| request.currency.clone())),
            gateway_error: info.gateway_error,
            created_date: now,
            updated_date: now,
            account_record_id: context.internal_call_context.account_record_id,
            tenant_record_id: context.internal_call_context.tenant_record_id,
        };
        self.dao
            .insert_payment_transaction(transaction.clone(), &context.internal_call_context)
            .await?;
        Ok(transaction)
    }

    async fn publish_event(
        &self,
        context: &PaymentStateControlContext,
        transaction: &PaymentTransaction,
    ) {
        let Some(listener) = &self.event_listener else {
            return;
        };
        let event = PaymentInternalEvent {
            account_id: context.account_id,
            payment_id: transaction.payment_id,
            transaction_id: transaction.id,
            transaction_external_key: transaction.transaction_external_key.clone(),
            transaction_type: transaction.transaction_type,
            status: transaction.status,
            user_token: context.internal_call_context.user_token,
            account_record_id: context.internal_call_context.account_record_id,
            tenant_record_id: context.internal_call_context.tenant_record_id,
        };
        listener.on_payment_event(&event).await;
    }

    async fn retry_scheduled(&self, context: &PaymentStateControlContext) -> Result<()> {
        let (Some(retry_date), Some(attempt_id)) = (context.retry_date, context.attempt_id) else {
            warn!(
                transaction_external_key = %context.payment_transaction_external_key,
                "Entered RETRIED without a retry date or attempt"
            );
            return Ok(());
        };
        self.retry_scheduler
            .schedule_retry(
                ObjectType::PaymentAttempt,
                attempt_id,
                context.internal_call_context.user_token,
                context.internal_call_context.tenant_record_id,
                &context.payment_control_plugin_names,
                retry_date,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::ClockMock;
    use crate::domain::payment::{
        PaymentAttempt, PluginProperty, TransactionStatusUpdate, TransactionType,
    };
    use crate::domain::plugin::{
        ControlPlugin, OnFailureResult, PaymentControlContext, PriorCallResult, RoutingError,
    };
    use crate::domain::ports::{PaymentDao, PaymentPluginApi, PaymentPluginError};
    use crate::infrastructure::in_memory::InMemoryPaymentDao;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeDelta, Utc};
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingScheduler {
        scheduled: Mutex<Vec<(Uuid, DateTime<Utc>)>>,
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

    /// Answers gateway calls from a fixed script.
    struct ScriptGateway {
        answers: Mutex<VecDeque<std::result::Result<TransactionStatus, PaymentPluginError>>>,
        calls: Mutex<Vec<GatewayRequest>>,
    }

    impl ScriptGateway {
        fn new(
            answers: Vec<std::result::Result<TransactionStatus, PaymentPluginError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.into()),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl PaymentPluginApi for ScriptGateway {
        async fn process_payment(
            &self,
            request: &GatewayRequest,
        ) -> std::result::Result<GatewayTransactionInfo, PaymentPluginError> {
            self.calls.lock().unwrap().push(request.clone());
            let answer = self
                .answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(TransactionStatus::Success));
            answer.map(|status| GatewayTransactionInfo {
                status,
                processed_amount: None,
                processed_currency: None,
                gateway_error: None,
            })
        }

        async fn get_payment_info(
            &self,
            _transaction: &PaymentTransaction,
        ) -> std::result::Result<Option<GatewayTransactionInfo>, PaymentPluginError> {
            Ok(None)
        }
    }

    struct RetryOncePlugin {
        retry_in: TimeDelta,
        clock: Arc<ClockMock>,
        abort: bool,
    }

    #[async_trait]
    impl ControlPlugin for RetryOncePlugin {
        async fn prior_call(
            &self,
            _context: &PaymentControlContext,
            _properties: &[PluginProperty],
        ) -> std::result::Result<PriorCallResult, RoutingError> {
            Ok(PriorCallResult {
                is_aborted: self.abort,
                adjusted_amount: None,
            })
        }

        async fn on_success_call(
            &self,
            _context: &PaymentControlContext,
            _properties: &[PluginProperty],
        ) -> std::result::Result<(), RoutingError> {
            Ok(())
        }

        async fn on_failure_call(
            &self,
            _context: &PaymentControlContext,
            _properties: &[PluginProperty],
        ) -> std::result::Result<OnFailureResult, RoutingError> {
            if self.abort {
                return Ok(OnFailureResult::no_retry());
            }
            Ok(OnFailureResult::retry_at(self.clock.utc_now() + self.retry_in))
        }
    }

    struct Fixture {
        dao: Arc<InMemoryPaymentDao>,
        gateway: Arc<ScriptGateway>,
        scheduler: Arc<RecordingScheduler>,
        clock: Arc<ClockMock>,
        runner: PluginControlPaymentAutomatonRunner,
    }

    async fn fixture(
        answers: Vec<std::result::Result<TransactionStatus, PaymentPluginError>>,
        abort: bool,
    ) -> Fixture {
        let dao = Arc::new(InMemoryPaymentDao::new());
        let gateway = ScriptGateway::new(answers);
        let scheduler = Arc::new(RecordingScheduler::default());
        let clock = Arc::new(ClockMock::new(Utc::now()));
        let registry = Arc::new(PluginRegistry::new());
        registry
            .register(
                "retry",
                Arc::new(RetryOncePlugin {
                    retry_in: TimeDelta::hours(1),
                    clock: clock.clone(),
                    abort,
                }),
            )
            .await;
        let runner = PluginControlPaymentAutomatonRunner::new(
            dao.clone(),
            gateway.clone(),
            registry,
            scheduler.clone(),
            clock.clone(),
        );
        Fixture {
            dao,
            gateway,
            scheduler,
            clock,
            runner,
        }
    }

    fn request() -> PaymentRequest {
        PaymentRequest {
            transaction_type: TransactionType::Purchase,
            account_id: Uuid::new_v4(),
            payment_method_id: Uuid::new_v4(),
            payment_id: None,
            payment_external_key: "tx-1-payment".to_string(),
            transaction_external_key: "tx-1".to_string(),
            amount: dec!(25.0),
            currency: "EUR".to_string(),
            properties: Vec::new(),
            plugin_names: vec!["retry".to_string()],
            is_api_payment: true,
        }
    }

    fn call_context() -> InternalCallContext {
        InternalCallContext::new(1, Some(10), Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_success_leaves_no_attempt() {
        let f = fixture(vec![Ok(TransactionStatus::Success)], false).await;
        let ctx = f.runner.run(request(), call_context()).await.unwrap();

        assert!(ctx.attempt_id.is_none());
        let tx = ctx.current_transaction.unwrap();
        assert_eq!(tx.status, TransactionStatus::Success);
        assert_eq!(tx.processed_amount, Some(dec!(25.0)));
        assert!(f.dao.get_payment_attempts(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_with_retry_date_enters_retried_and_schedules_once() {
        let f = fixture(vec![Ok(TransactionStatus::Failed)], false).await;
        let ctx = f.runner.run(request(), call_context()).await.unwrap();

        let attempt_id = ctx.attempt_id.unwrap();
        let attempt = f
            .dao
            .get_payment_attempt(attempt_id, &ctx.internal_call_context)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempt.state_name, ControlState::Retried);
        assert_eq!(attempt.transaction_id, ctx.transaction_id);

        let scheduled = f.scheduler.scheduled.lock().unwrap().clone();
        assert_eq!(
            scheduled,
            vec![(attempt_id, f.clock.utc_now() + TimeDelta::hours(1))]
        );
    }

    #[tokio::test]
    async fn test_resume_runs_retried_attempt_to_success() {
        let f = fixture(
            vec![Ok(TransactionStatus::Failed), Ok(TransactionStatus::Success)],
            false,
        )
        .await;
        let first = f.runner.run(request(), call_context()).await.unwrap();
        let attempt_id = first.attempt_id.unwrap();

        let resumed = f
            .runner
            .resume(attempt_id, Vec::new(), first.internal_call_context)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(resumed.attempt_id, Some(attempt_id));
        assert_eq!(resumed.payment_id, first.payment_id);
        let attempt = f
            .dao
            .get_payment_attempt(attempt_id, &first.internal_call_context)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempt.state_name, ControlState::Success);
        assert_eq!(attempt.transaction_id, resumed.transaction_id);

        let transactions = f
            .dao
            .get_payment_transactions_by_external_key("tx-1", &first.internal_call_context)
            .await
            .unwrap();
        assert_eq!(transactions.len(), 2);
    }

    #[tokio::test]
    async fn test_resume_skips_attempt_not_in_retried() {
        let f = fixture(
            vec![Ok(TransactionStatus::Failed), Ok(TransactionStatus::Success)],
            false,
        )
        .await;
        let first = f.runner.run(request(), call_context()).await.unwrap();
        let attempt_id = first.attempt_id.unwrap();

        f.runner
            .resume(attempt_id, Vec::new(), first.internal_call_context)
            .await
            .unwrap();
        // A duplicate delivery of the same retry notification
        let duplicate = f
            .runner
            .resume(attempt_id, Vec::new(), first.internal_call_context)
            .await
            .unwrap();

        assert!(duplicate.is_none());
        assert_eq!(f.gateway.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_outcome_aborts_without_retry() {
        let f = fixture(vec![Err(PaymentPluginError::Timeout)], false).await;
        let ctx = f.runner.run(request(), call_context()).await.unwrap();

        let tx = ctx.current_transaction.as_ref().unwrap();
        assert_eq!(tx.status, TransactionStatus::Unknown);
        assert!(tx.gateway_error.is_some());
        let attempt = f
            .dao
            .get_payment_attempt(ctx.attempt_id.unwrap(), &ctx.internal_call_context)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempt.state_name, ControlState::Aborted);
        assert!(f.scheduler.scheduled.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_plugin_failure_is_retried_by_completion() {
        let f = fixture(
            vec![Err(PaymentPluginError::Failure("declined by processor".to_string()))],
            false,
        )
        .await;
        let ctx = f.runner.run(request(), call_context()).await.unwrap();

        let attempt = f
            .dao
            .get_payment_attempt(ctx.attempt_id.unwrap(), &ctx.internal_call_context)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempt.state_name, ControlState::Retried);
        assert_eq!(f.scheduler.scheduled.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_prior_call_abort_skips_gateway() {
        let f = fixture(vec![Ok(TransactionStatus::Success)], true).await;
        let ctx = f.runner.run(request(), call_context()).await.unwrap();

        assert!(f.gateway.calls.lock().unwrap().is_empty());
        assert!(ctx.current_transaction.is_none());
        let attempt = f
            .dao
            .get_payment_attempt(ctx.attempt_id.unwrap(), &ctx.internal_call_context)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempt.state_name, ControlState::Aborted);
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected() {
        let f = fixture(Vec::new(), false).await;
        let mut invalid = request();
        invalid.amount = dec!(-1);

        let result = f.runner.run(invalid, call_context()).await;
        assert!(matches!(result, Err(PaymentError::ValidationError(_))));
        assert!(f.gateway.calls.lock().unwrap().is_empty());
    }

    /// Fails transaction inserts while `failing` is set.
    struct FlakyDao {
        inner: InMemoryPaymentDao,
        failing: AtomicBool,
    }

    #[async_trait]
    impl PaymentDao for FlakyDao {
        async fn insert_payment_attempt_with_properties(
            &self,
            attempt: PaymentAttempt,
            context: &InternalCallContext,
        ) -> Result<PaymentAttempt> {
            self.inner
                .insert_payment_attempt_with_properties(attempt, context)
                .await
        }

        async fn update_payment_attempt(
            &self,
            attempt_id: Uuid,
            transaction_id: Option<Uuid>,
            expected_state: ControlState,
            new_state: ControlState,
            updated_date: DateTime<Utc>,
            context: &InternalCallContext,
        ) -> Result<()> {
            self.inner
                .update_payment_attempt(
                    attempt_id,
                    transaction_id,
                    expected_state,
                    new_state,
                    updated_date,
                    context,
                )
                .await
        }

        async fn get_payment_attempt(
            &self,
            attempt_id: Uuid,
            context: &InternalCallContext,
        ) -> Result<Option<PaymentAttempt>> {
            self.inner.get_payment_attempt(attempt_id, context).await
        }

        async fn get_payment_attempts(&self, tenant_record_id: u64) -> Result<Vec<PaymentAttempt>> {
            self.inner.get_payment_attempts(tenant_record_id).await
        }

        async fn insert_payment_transaction(
            &self,
            transaction: PaymentTransaction,
            context: &InternalCallContext,
        ) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(PaymentError::InternalError("store unavailable".into()));
            }
            self.inner.insert_payment_transaction(transaction, context).await
        }

        async fn update_payment_transaction_status(
            &self,
            transaction_id: Uuid,
            expected_status: TransactionStatus,
            update: TransactionStatusUpdate,
            context: &InternalCallContext,
        ) -> Result<()> {
            self.inner
                .update_payment_transaction_status(transaction_id, expected_status, update, context)
                .await
        }

        async fn get_payment_transaction(
            &self,
            transaction_id: Uuid,
            context: &InternalCallContext,
        ) -> Result<Option<PaymentTransaction>> {
            self.inner.get_payment_transaction(transaction_id, context).await
        }

        async fn get_payment_transactions_by_external_key(
            &self,
            transaction_external_key: &str,
            context: &InternalCallContext,
        ) -> Result<Vec<PaymentTransaction>> {
            self.inner
                .get_payment_transactions_by_external_key(transaction_external_key, context)
                .await
        }
    }

    #[tokio::test]
    async fn test_failed_resume_hands_attempt_back() {
        let f = fixture(vec![Ok(TransactionStatus::Failed)], false).await;
        let dao = Arc::new(FlakyDao {
            inner: InMemoryPaymentDao::new(),
            failing: AtomicBool::new(false),
        });
        let runner = PluginControlPaymentAutomatonRunner::new(
            dao.clone(),
            f.gateway.clone(),
            Arc::new(PluginRegistry::new()),
            f.scheduler.clone(),
            f.clock.clone(),
        );
        let mut failing_request = request();
        failing_request.plugin_names = Vec::new();
        let first = runner.run(failing_request, call_context()).await.unwrap();
        let attempt_id = first.attempt_id.unwrap();
        // No plugin, so the attempt is aborted; put it up for a retry by hand
        dao.update_payment_attempt(
            attempt_id,
            None,
            ControlState::Aborted,
            ControlState::Retried,
            f.clock.utc_now(),
            &first.internal_call_context,
        )
        .await
        .unwrap();

        dao.failing.store(true, Ordering::SeqCst);
        assert!(matches!(
            runner
                .resume(attempt_id, Vec::new(), first.internal_call_context)
                .await,
            Err(PaymentError::InternalError(_))
        ));
        let attempt = dao
            .get_payment_attempt(attempt_id, &first.internal_call_context)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempt.state_name, ControlState::Retried);

        dao.failing.store(false, Ordering::SeqCst);
        let resumed = runner
            .resume(attempt_id, Vec::new(), first.internal_call_context)
            .await
            .unwrap();
        assert!(resumed.is_some());
        let attempt = dao
            .get_payment_attempt(attempt_id, &first.internal_call_context)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempt.state_name, ControlState::Success);
    }
}
