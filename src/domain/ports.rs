use super::payment::{
    InternalCallContext, PaymentAttempt, PaymentInternalEvent, PaymentTransaction,
    TransactionStatus, TransactionStatusUpdate, TransactionType,
};
use super::state::ControlState;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Persistent record of payment attempts and transactions.
///
/// State and status updates are compare-and-set: they fail with a stale
/// error when the stored value is not the expected one, which is how
/// concurrent writers on the same attempt are kept apart.
#[async_trait]
pub trait PaymentDao: Send + Sync {
    async fn insert_payment_attempt_with_properties(
        &self,
        attempt: PaymentAttempt,
        context: &InternalCallContext,
    ) -> Result<PaymentAttempt>;

    async fn update_payment_attempt(
        &self,
        attempt_id: Uuid,
        transaction_id: Option<Uuid>,
        expected_state: ControlState,
        new_state: ControlState,
        updated_date: DateTime<Utc>,
        context: &InternalCallContext,
    ) -> Result<()>;

    async fn get_payment_attempt(
        &self,
        attempt_id: Uuid,
        context: &InternalCallContext,
    ) -> Result<Option<PaymentAttempt>>;

    async fn get_payment_attempts(&self, tenant_record_id: u64) -> Result<Vec<PaymentAttempt>>;

    async fn insert_payment_transaction(
        &self,
        transaction: PaymentTransaction,
        context: &InternalCallContext,
    ) -> Result<()>;

    async fn update_payment_transaction_status(
        &self,
        transaction_id: Uuid,
        expected_status: TransactionStatus,
        update: TransactionStatusUpdate,
        context: &InternalCallContext,
    ) -> Result<()>;

    async fn get_payment_transaction(
        &self,
        transaction_id: Uuid,
        context: &InternalCallContext,
    ) -> Result<Option<PaymentTransaction>>;

    async fn get_payment_transactions_by_external_key(
        &self,
        transaction_external_key: &str,
        context: &InternalCallContext,
    ) -> Result<Vec<PaymentTransaction>>;
}

pub type PaymentDaoRef = Arc<dyn PaymentDao>;

/// Failure of the gateway call itself.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PaymentPluginError {
    #[error("gateway call timed out")]
    Timeout,
    #[error("gateway plugin crashed: {0}")]
    Crashed(String),
    #[error("gateway plugin failed: {0}")]
    Failure(String),
}

impl PaymentPluginError {
    /// Whether the real outcome of the call is unknown.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, PaymentPluginError::Timeout | PaymentPluginError::Crashed(_))
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct GatewayRequest {
    pub payment_id: Uuid,
    pub transaction_id: Uuid,
    pub transaction_external_key: String,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub currency: String,
}

#[derive(Debug, PartialEq, Clone)]
pub struct GatewayTransactionInfo {
    pub status: TransactionStatus,
    pub processed_amount: Option<Decimal>,
    pub processed_currency: Option<String>,
    pub gateway_error: Option<String>,
}

/// The payment gateway plugin performing the actual operation.
#[async_trait]
pub trait PaymentPluginApi: Send + Sync {
    async fn process_payment(
        &self,
        request: &GatewayRequest,
    ) -> std::result::Result<GatewayTransactionInfo, PaymentPluginError>;

    /// Current view of the gateway on a transaction, `None` if it has no
    /// record of it.
    async fn get_payment_info(
        &self,
        transaction: &PaymentTransaction,
    ) -> std::result::Result<Option<GatewayTransactionInfo>, PaymentPluginError>;
}

pub type PaymentPluginApiRef = Arc<dyn PaymentPluginApi>;

/// Receiver of payment events published after each gateway transaction.
#[async_trait]
pub trait PaymentEventListener: Send + Sync {
    async fn on_payment_event(&self, event: &PaymentInternalEvent);
}
