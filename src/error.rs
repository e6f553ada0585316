use crate::application::lifecycle::LifecycleState;
use crate::domain::notification::QueueError;
use crate::domain::payment::TransactionStatus;
use crate::domain::state::ControlState;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, PaymentError>;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Failed to serialize plugin properties")]
    PropertySerialization(#[source] serde_json::Error),
    #[error("Failed to deserialize plugin properties for attempt {attempt_id}")]
    PropertyDeserialization {
        attempt_id: Uuid,
        #[source]
        source: serde_json::Error,
    },
    #[error("Attempt {attempt_id} is in state {actual}, expected {expected}")]
    StaleAttemptState {
        attempt_id: Uuid,
        expected: ControlState,
        actual: ControlState,
    },
    #[error("Transaction {transaction_id} is in status {actual}, expected {expected}")]
    StaleTransactionStatus {
        transaction_id: Uuid,
        expected: TransactionStatus,
        actual: TransactionStatus,
    },
    #[error("Payment attempt {0} not found")]
    AttemptNotFound(Uuid),
    #[error("Payment transaction {0} not found")]
    TransactionNotFound(Uuid),
    #[error("No control operation can run from state {0}")]
    InvalidTransition(ControlState),
    #[error("{service} cannot move from {from} to {to}")]
    IllegalLifecycleTransition {
        service: &'static str,
        from: LifecycleState,
        to: LifecycleState,
    },
    #[error("{0} has not been initialized")]
    NotInitialized(&'static str),
    #[error("Notification queue error: {0}")]
    QueueError(#[from] QueueError),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    StorageError(#[from] rocksdb::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}
