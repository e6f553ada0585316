use crate::domain::payment::{PluginProperty, TransactionType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Error raised by a control plugin. Callers treat it as "this plugin
/// contributed nothing".
#[derive(Error, Debug, Clone, PartialEq)]
#[error("control plugin error: {0}")]
pub struct RoutingError(pub String);

/// Read-only snapshot of a payment call handed to control plugins.
#[derive(Debug, PartialEq, Clone)]
pub struct PaymentControlContext {
    pub account_id: Uuid,
    pub payment_method_id: Uuid,
    pub attempt_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub payment_external_key: String,
    pub transaction_id: Option<Uuid>,
    pub transaction_external_key: String,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub currency: String,
    /// Only populated when the transaction succeeded (SUCCESS or PENDING).
    pub processed_amount: Option<Decimal>,
    pub processed_currency: Option<String>,
    pub is_api_payment: bool,
}

#[derive(Debug, Default, PartialEq, Clone)]
pub struct PriorCallResult {
    pub is_aborted: bool,
    pub adjusted_amount: Option<Decimal>,
}

#[derive(Debug, Default, PartialEq, Clone)]
pub struct OnFailureResult {
    /// Retry no earlier than this date, if set.
    pub next_retry_date: Option<DateTime<Utc>>,
}

impl OnFailureResult {
    pub fn retry_at(date: DateTime<Utc>) -> Self {
        Self {
            next_retry_date: Some(date),
        }
    }

    pub fn no_retry() -> Self {
        Self::default()
    }
}

/// Runtime-pluggable routing behavior consulted around each payment call.
#[async_trait]
pub trait ControlPlugin: Send + Sync {
    async fn prior_call(
        &self,
        _context: &PaymentControlContext,
        _properties: &[PluginProperty],
    ) -> Result<PriorCallResult, RoutingError> {
        Ok(PriorCallResult::default())
    }

    async fn on_success_call(
        &self,
        context: &PaymentControlContext,
        properties: &[PluginProperty],
    ) -> Result<(), RoutingError>;

    async fn on_failure_call(
        &self,
        context: &PaymentControlContext,
        properties: &[PluginProperty],
    ) -> Result<OnFailureResult, RoutingError>;
}

/// Control plugins registered by name.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<HashMap<String, Arc<dyn ControlPlugin>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, name: impl Into<String>, plugin: Arc<dyn ControlPlugin>) {
        self.plugins.write().await.insert(name.into(), plugin);
    }

    pub async fn unregister(&self, name: &str) -> Option<Arc<dyn ControlPlugin>> {
        self.plugins.write().await.remove(name)
    }

    pub async fn get_service_for_name(&self, name: &str) -> Option<Arc<dyn ControlPlugin>> {
        self.plugins.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}
