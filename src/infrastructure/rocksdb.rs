use crate::domain::payment::{
    InternalCallContext, PaymentAttempt, PaymentTransaction, TransactionStatus,
    TransactionStatusUpdate,
};
use crate::domain::ports::PaymentDao;
use crate::domain::state::ControlState;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Column Family for storing payment attempts.
pub const CF_ATTEMPTS: &str = "attempts";
/// Column Family for storing payment transactions.
pub const CF_TRANSACTIONS: &str = "transactions";

/// A persistent payment store using RocksDB.
///
/// Attempts and transactions live in separate Column Families, keyed by
/// their id and stored as JSON. Compare-and-set updates are serialized by
/// `write_lock`, so read-check-write is atomic within the process.
#[derive(Clone)]
pub struct RocksDbPaymentDao {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDbPaymentDao {
    /// Opens or creates a RocksDB instance at the specified path, creating
    /// the "attempts" and "transactions" column families when missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_attempts = ColumnFamilyDescriptor::new(CF_ATTEMPTS, Options::default());
        let cf_transactions = ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_attempts, cf_transactions])?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &'static str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            PaymentError::InternalError(Box::new(std::io::Error::other(format!(
                "{} column family not found",
                name
            ))))
        })
    }

    fn put<T: Serialize>(&self, cf_name: &'static str, id: Uuid, value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        let bytes = serde_json::to_vec(value).map_err(|e| {
            PaymentError::InternalError(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Serialization error: {}", e),
            )))
        })?;
        self.db.put_cf(cf, id.as_bytes(), bytes)?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, cf_name: &'static str, id: Uuid) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf_name: &'static str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut values = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item.map_err(|e| {
                PaymentError::InternalError(Box::new(std::io::Error::other(format!(
                    "RocksDB iteration error: {}",
                    e
                ))))
            })?;
            values.push(decode(&value)?);
        }
        Ok(values)
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        PaymentError::InternalError(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Deserialization error: {}", e),
        )))
    })
}

#[async_trait]
impl PaymentDao for RocksDbPaymentDao {
    async fn insert_payment_attempt_with_properties(
        &self,
        attempt: PaymentAttempt,
        _context: &InternalCallContext,
    ) -> Result<PaymentAttempt> {
        self.put(CF_ATTEMPTS, attempt.id, &attempt)?;
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
        let _guard = self.write_lock.lock().await;
        let mut attempt = self
            .get::<PaymentAttempt>(CF_ATTEMPTS, attempt_id)?
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
        self.put(CF_ATTEMPTS, attempt_id, &attempt)
    }

    async fn get_payment_attempt(
        &self,
        attempt_id: Uuid,
        context: &InternalCallContext,
    ) -> Result<Option<PaymentAttempt>> {
        Ok(self
            .get::<PaymentAttempt>(CF_ATTEMPTS, attempt_id)?
            .filter(|attempt| attempt.tenant_record_id == context.tenant_record_id))
    }

    async fn get_payment_attempts(&self, tenant_record_id: u64) -> Result<Vec<PaymentAttempt>> {
        let mut attempts: Vec<PaymentAttempt> = self
            .scan::<PaymentAttempt>(CF_ATTEMPTS)?
            .into_iter()
            .filter(|attempt| attempt.tenant_record_id == tenant_record_id)
            .collect();
        attempts.sort_by_key(|attempt| attempt.created_date);
        Ok(attempts)
    }

    async fn insert_payment_transaction(
        &self,
        transaction: PaymentTransaction,
        _context: &InternalCallContext,
    ) -> Result<()> {
        self.put(CF_TRANSACTIONS, transaction.id, &transaction)
    }

    async fn update_payment_transaction_status(
        &self,
        transaction_id: Uuid,
        expected_status: TransactionStatus,
        update: TransactionStatusUpdate,
        context: &InternalCallContext,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut transaction = self
            .get::<PaymentTransaction>(CF_TRANSACTIONS, transaction_id)?
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
        self.put(CF_TRANSACTIONS, transaction_id, &transaction)
    }

    async fn get_payment_transaction(
        &self,
        transaction_id: Uuid,
        context: &InternalCallContext,
    ) -> Result<Option<PaymentTransaction>> {
        Ok(self
            .get::<PaymentTransaction>(CF_TRANSACTIONS, transaction_id)?
            .filter(|tx| tx.tenant_record_id == context.tenant_record_id))
    }

    async fn get_payment_transactions_by_external_key(
        &self,
        transaction_external_key: &str,
        context: &InternalCallContext,
    ) -> Result<Vec<PaymentTransaction>> {
        let mut transactions: Vec<PaymentTransaction> = self
            .scan::<PaymentTransaction>(CF_TRANSACTIONS)?
            .into_iter()
            .filter(|tx| {
                tx.tenant_record_id == context.tenant_record_id
                    && tx.transaction_external_key == transaction_external_key
            })
            .collect();
        transactions.sort_by_key(|tx| tx.created_date);
        Ok(transactions)
    }
}
