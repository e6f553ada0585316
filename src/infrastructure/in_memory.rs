use crate::domain::payment::{
    InternalCallContext, PaymentAttempt, PaymentTransaction, TransactionStatus,
    TransactionStatusUpdate,
};
use crate::domain::ports::PaymentDao;
use crate::domain::state::ControlState;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A thread-safe in-memory store for payment attempts and transactions.
///
/// Compare-and-set updates run under the write lock, which makes them atomic
/// with respect to every other writer of this store.
#[derive(Default, Clone)]
pub struct InMemoryPaymentDao {
    attempts: Arc<RwLock<HashMap<Uuid, PaymentAttempt>>>,
    transactions: Arc<RwLock<HashMap<Uuid, PaymentTransaction>>>,
}

impl InMemoryPaymentDao {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentDao for InMemoryPaymentDao {
    async fn insert_payment_attempt_with_properties(
        &self,
        attempt: PaymentAttempt,
        _context: &InternalCallContext,
    ) -> Result<PaymentAttempt> {
        let mut attempts = self.attempts.write().await;
        attempts.insert(attempt.id, attempt.clone());
        Ok(attempt)
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
        let mut attempts = self.attempts.write().await;
        let attempt = attempts
            .get_mut(&attempt_id)
            .filter(|attempt| attempt.tenant_record_id == context.tenant_record_id)
            .ok_or(PaymentError::AttemptNotFound(attempt_id))?;
        if attempt.state_name != expected_state {
            return Err(PaymentError::StaleAttemptState {
                attempt_id,
                expected: expected_state,
                actual: attempt.state_name,
            });
        }
        attempt.state_name = new_state;
        if transaction_id.is_some() {
            attempt.transaction_id = transaction_id;
        }
        attempt.updated_date = updated_date;
        Ok(())
    }

    async fn get_payment_attempt(
        &self,
        attempt_id: Uuid,
        context: &InternalCallContext,
    ) -> Result<Option<PaymentAttempt>> {
        let attempts = self.attempts.read().await;
        Ok(attempts
            .get(&attempt_id)
            .filter(|attempt| attempt.tenant_record_id == context.tenant_record_id)
            .cloned())
    }

    async fn get_payment_attempts(&self, tenant_record_id: u64) -> Result<Vec<PaymentAttempt>> {
        let attempts = self.attempts.read().await;
        let mut found: Vec<PaymentAttempt> = attempts
            .values()
            .filter(|attempt| attempt.tenant_record_id == tenant_record_id)
            .cloned()
            .collect();
        found.sort_by_key(|attempt| attempt.created_date);
        Ok(found)
    }

    async fn insert_payment_transaction(
        &self,
        transaction: PaymentTransaction,
        _context: &InternalCallContext,
    ) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        transactions.insert(transaction.id, transaction);
        Ok(())
    }

    async fn update_payment_transaction_status(
        &self,
        transaction_id: Uuid,
        expected_status: TransactionStatus,
        update: TransactionStatusUpdate,
        context: &InternalCallContext,
    ) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        let transaction = transactions
            .get_mut(&transaction_id)
            .filter(|tx| tx.tenant_record_id == context.tenant_record_id)
            .ok_or(PaymentError::TransactionNotFound(transaction_id))?;
        if transaction.status != expected_status {
            return Err(PaymentError::StaleTransactionStatus {
                transaction_id,
                expected: expected_status,
                actual: transaction.status,
            });
        }
        transaction.status = update.status;
        transaction.processed_amount = update.processed_amount;
        transaction.processed_currency = update.processed_currency;
        transaction.gateway_error = update.gateway_error;
        transaction.updated_date = update.updated_date;
        Ok(())
    }

    async fn get_payment_transaction(
        &self,
        transaction_id: Uuid,
        context: &InternalCallContext,
    ) -> Result<Option<PaymentTransaction>> {
        let transactions = self.transactions.read().await;
        Ok(transactions
            .get(&transaction_id)
            .filter(|tx| tx.tenant_record_id == context.tenant_record_id)
            .cloned())
    }

    async fn get_payment_transactions_by_external_key(
        &self,
        transaction_external_key: &str,
        context: &InternalCallContext,
    ) -> Result<Vec<PaymentTransaction>> {
        let transactions = self.transactions.read().await;
        let mut found: Vec<PaymentTransaction> = transactions
            .values()
            .filter(|tx| {
                tx.tenant_record_id == context.tenant_record_id
                    && tx.transaction_external_key == transaction_external_key
            })
            .cloned()
            .collect();
        found.sort_by_key(|tx| tx.created_date);
        Ok(found)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::domain::payment::{
        InternalCallContext, PaymentAttempt, PaymentTransaction, TransactionStatus,
        TransactionType,
    };
    use crate::domain::state::ControlState;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    pub fn context() -> InternalCallContext {
        InternalCallContext::new(1, Some(10), Uuid::new_v4())
    }

    pub fn attempt(key: &str, state: ControlState) -> PaymentAttempt {
        let now = Utc::now();
        PaymentAttempt {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            payment_method_id: Uuid::new_v4(),
            created_date: now,
            updated_date: now,
            payment_external_key: format!("{key}-payment"),
            transaction_id: None,
            transaction_external_key: key.to_string(),
            transaction_type: TransactionType::Purchase,
            state_name: state,
            amount: dec!(10.0),
            currency: "USD".to_string(),
            plugin_names: vec!["retry".to_string()],
            plugin_properties: Vec::new(),
            account_record_id: Some(10),
            tenant_record_id: 1,
        }
    }

    pub fn transaction(key: &str, status: TransactionStatus) -> PaymentTransaction {
        let now = Utc::now();
        PaymentTransaction {
            id: Uuid::new_v4(),
            payment_id: Uuid::new_v4(),
            attempt_id: None,
            transaction_external_key: key.to_string(),
            transaction_type: TransactionType::Purchase,
            status,
            amount: dec!(10.0),
            currency: "USD".to_string(),
            processed_amount: None,
            processed_currency: None,
            gateway_error: None,
            created_date: now,
            updated_date: now,
            account_record_id: Some(10),
            tenant_record_id: 1,
        }
    }
}
