use crate::domain::state::ControlState;
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    #[serde(alias = "authorize")]
    Authorize,
    #[serde(alias = "capture")]
    Capture,
    #[serde(alias = "purchase")]
    Purchase,
    #[serde(alias = "refund")]
    Refund,
    #[serde(alias = "credit")]
    Credit,
    #[serde(alias = "void")]
    Void,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Success,
    Pending,
    Failed,
    /// The outcome could not be determined (gateway crash or timeout).
    Unknown,
    PluginFailure,
}

impl TransactionStatus {
    /// SUCCESS and PENDING both count as a successful gateway call.
    pub fn is_success(&self) -> bool {
        matches!(self, TransactionStatus::Success | TransactionStatus::Pending)
    }

    /// Statuses the janitor keeps checking until the gateway settles them.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, TransactionStatus::Pending | TransactionStatus::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Success => "SUCCESS",
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Unknown => "UNKNOWN",
            TransactionStatus::PluginFailure => "PLUGIN_FAILURE",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of objects a retry can be scheduled for.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectType {
    PaymentAttempt,
}

/// Opaque key/value pair passed through to plugins.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PluginProperty {
    pub key: String,
    pub value: serde_json::Value,
}

impl PluginProperty {
    pub fn new(key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

pub fn serialize_properties(properties: &[PluginProperty]) -> Result<Vec<u8>> {
    serde_json::to_vec(properties).map_err(PaymentError::PropertySerialization)
}

pub fn deserialize_properties(attempt_id: Uuid, bytes: &[u8]) -> Result<Vec<PluginProperty>> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_slice(bytes)
        .map_err(|source| PaymentError::PropertyDeserialization { attempt_id, source })
}

/// Tenant/account scoping carried by every store call.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
pub struct InternalCallContext {
    pub tenant_record_id: u64,
    pub account_record_id: Option<u64>,
    pub user_token: Uuid,
}

impl InternalCallContext {
    pub fn new(tenant_record_id: u64, account_record_id: Option<u64>, user_token: Uuid) -> Self {
        Self {
            tenant_record_id,
            account_record_id,
            user_token,
        }
    }
}

/// One tracked try at executing a transaction type through the control
/// state machine.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PaymentAttempt {
    pub id: Uuid,
    pub account_id: Uuid,
    pub payment_method_id: Uuid,
    pub created_date: DateTime<Utc>,
    pub updated_date: DateTime<Utc>,
    pub payment_external_key: String,
    pub transaction_id: Option<Uuid>,
    pub transaction_external_key: String,
    pub transaction_type: TransactionType,
    pub state_name: ControlState,
    pub amount: Decimal,
    pub currency: String,
    pub plugin_names: Vec<String>,
    /// Serialized `PluginProperty` list.
    pub plugin_properties: Vec<u8>,
    pub account_record_id: Option<u64>,
    pub tenant_record_id: u64,
}

/// A single gateway-facing operation.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub attempt_id: Option<Uuid>,
    pub transaction_external_key: String,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub amount: Decimal,
    pub currency: String,
    pub processed_amount: Option<Decimal>,
    pub processed_currency: Option<String>,
    pub gateway_error: Option<String>,
    pub created_date: DateTime<Utc>,
    pub updated_date: DateTime<Utc>,
    pub account_record_id: Option<u64>,
    pub tenant_record_id: u64,
}

/// New status for a transaction, applied with a compare-and-set.
#[derive(Debug, PartialEq, Clone)]
pub struct TransactionStatusUpdate {
    pub status: TransactionStatus,
    pub processed_amount: Option<Decimal>,
    pub processed_currency: Option<String>,
    pub gateway_error: Option<String>,
    pub updated_date: DateTime<Utc>,
}

/// A payment operation request entering the control state machine.
#[derive(Debug, PartialEq, Clone)]
pub struct PaymentRequest {
    pub transaction_type: TransactionType,
    pub account_id: Uuid,
    pub payment_method_id: Uuid,
    pub payment_id: Option<Uuid>,
    pub payment_external_key: String,
    pub transaction_external_key: String,
    pub amount: Decimal,
    pub currency: String,
    pub properties: Vec<PluginProperty>,
    pub plugin_names: Vec<String>,
    pub is_api_payment: bool,
}

impl PaymentRequest {
    pub fn validate(&self) -> Result<()> {
        if self.amount <= Decimal::ZERO {
            return Err(PaymentError::ValidationError(
                "Amount must be positive".to_string(),
            ));
        }
        if self.transaction_external_key.is_empty() {
            return Err(PaymentError::ValidationError(
                "Transaction external key is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Published after every gateway transaction.
#[derive(Debug, PartialEq, Clone)]
pub struct PaymentInternalEvent {
    pub account_id: Uuid,
    pub payment_id: Uuid,
    pub transaction_id: Uuid,
    pub transaction_external_key: String,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub user_token: Uuid,
    pub account_record_id: Option<u64>,
    pub tenant_record_id: u64,
}
