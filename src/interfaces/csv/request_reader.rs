use crate::domain::payment::{InternalCallContext, PaymentRequest, TransactionType};
use crate::error::{PaymentError, Result};
use crate::interfaces::simulation::{ScriptedOutcome, parse_outcomes};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;
use uuid::Uuid;

/// One row of the simulator input.
///
/// `outcomes` scripts the gateway answers for the key, `plugins` names the
/// control plugins consulted; both are `;`-separated and may be empty.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct PaymentRequestRecord {
    pub r#type: TransactionType,
    pub account: u64,
    pub key: String,
    pub amount: Decimal,
    pub currency: String,
    #[serde(default)]
    pub outcomes: String,
    #[serde(default)]
    pub plugins: String,
}

impl PaymentRequestRecord {
    pub fn outcomes(&self) -> Result<Vec<ScriptedOutcome>> {
        parse_outcomes(&self.outcomes)
    }

    pub fn plugin_names(&self) -> Vec<String> {
        split_list(&self.plugins)
    }

    /// Account and payment method ids are derived from the account number,
    /// so rows of the same account share them.
    pub fn to_request(&self) -> PaymentRequest {
        PaymentRequest {
            transaction_type: self.r#type,
            account_id: Uuid::from_u64_pair(self.account, 0),
            payment_method_id: Uuid::from_u64_pair(self.account, 1),
            payment_id: None,
            payment_external_key: format!("{}-payment", self.key),
            transaction_external_key: self.key.clone(),
            amount: self.amount,
            currency: self.currency.clone(),
            properties: Vec::new(),
            plugin_names: self.plugin_names(),
            is_api_payment: true,
        }
    }

    pub fn call_context(&self, tenant_record_id: u64) -> InternalCallContext {
        InternalCallContext::new(tenant_record_id, Some(self.account), Uuid::new_v4())
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Reads payment requests from a CSV source.
///
/// Wraps `csv::Reader` with whitespace trimming and flexible record lengths,
/// so trailing optional columns may be left out.
pub struct PaymentRequestReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> PaymentRequestReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads and deserializes the rows.
    pub fn requests(self) -> impl Iterator<Item = Result<PaymentRequestRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}
