use crate::domain::payment::{
    InternalCallContext, PaymentAttempt, PaymentRequest, PaymentTransaction, PluginProperty,
    TransactionType,
};
use crate::domain::plugin::PaymentControlContext;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Mutable per-call state threaded through one run of the control state
/// machine.
#[derive(Debug, Clone)]
pub struct PaymentStateControlContext {
    pub is_api_payment: bool,
    pub transaction_type: TransactionType,
    pub account_id: Uuid,
    pub payment_method_id: Uuid,
    pub payment_id: Option<Uuid>,
    pub payment_external_key: String,
    pub transaction_id: Option<Uuid>,
    pub payment_transaction_external_key: String,
    pub amount: Decimal,
    pub currency: String,
    pub properties: Vec<PluginProperty>,
    pub payment_control_plugin_names: Vec<String>,
    pub attempt_id: Option<Uuid>,
    pub current_transaction: Option<PaymentTransaction>,
    /// Set by the control operation when the plugins asked for a retry.
    pub retry_date: Option<DateTime<Utc>>,
    pub internal_call_context: InternalCallContext,
}

impl PaymentStateControlContext {
    pub fn from_request(request: PaymentRequest, internal_call_context: InternalCallContext) -> Self {
        Self {
            is_api_payment: request.is_api_payment,
            transaction_type: request.transaction_type,
            account_id: request.account_id,
            payment_method_id: request.payment_method_id,
            payment_id: request.payment_id,
            payment_external_key: request.payment_external_key,
            transaction_id: None,
            payment_transaction_external_key: request.transaction_external_key,
            amount: request.amount,
            currency: request.currency,
            properties: request.properties,
            payment_control_plugin_names: request.plugin_names,
            attempt_id: None,
            current_transaction: None,
            retry_date: None,
            internal_call_context,
        }
    }

    /// Rebuilds the context of a persisted attempt about to be resumed.
    pub fn from_attempt(
        attempt: &PaymentAttempt,
        properties: Vec<PluginProperty>,
        plugin_names: Vec<String>,
        last_transaction: Option<PaymentTransaction>,
        internal_call_context: InternalCallContext,
    ) -> Self {
        Self {
            is_api_payment: false,
            transaction_type: attempt.transaction_type,
            account_id: attempt.account_id,
            payment_method_id: attempt.payment_method_id,
            payment_id: last_transaction.as_ref().map(|tx| tx.payment_id),
            payment_external_key: attempt.payment_external_key.clone(),
            transaction_id: attempt.transaction_id,
            payment_transaction_external_key: attempt.transaction_external_key.clone(),
            amount: attempt.amount,
            currency: attempt.currency.clone(),
            properties,
            payment_control_plugin_names: plugin_names,
            attempt_id: Some(attempt.id),
            current_transaction: last_transaction,
            retry_date: None,
            internal_call_context,
        }
    }

    /// Whether the current transaction exists and is SUCCESS or PENDING.
    pub fn is_success(&self) -> bool {
        self.current_transaction
            .as_ref()
            .is_some_and(|tx| tx.status.is_success())
    }

    /// Snapshot handed to control plugins. Processed amount and currency are
    /// only exposed when `success` holds.
    pub fn plugin_context(&self, success: bool) -> PaymentControlContext {
        let processed = self
            .current_transaction
            .as_ref()
            .filter(|_| success);
        PaymentControlContext {
            account_id: self.account_id,
            payment_method_id: self.payment_method_id,
            attempt_id: self.attempt_id,
            payment_id: self.payment_id,
            payment_external_key: self.payment_external_key.clone(),
            transaction_id: self.transaction_id,
            transaction_external_key: self.payment_transaction_external_key.clone(),
            transaction_type: self.transaction_type,
            amount: self.amount,
            currency: self.currency.clone(),
            processed_amount: processed.and_then(|tx| tx.processed_amount),
            processed_currency: processed.and_then(|tx| tx.processed_currency.clone()),
            is_api_payment: self.is_api_payment,
        }
    }
}
