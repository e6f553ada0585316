//! Scripted gateway and clock-driven replay used by the command line
//! simulator.

use crate::domain::clock::{Clock, ClockMock};
use crate::domain::payment::{InternalCallContext, PaymentTransaction, TransactionStatus};
use crate::domain::ports::{
    GatewayRequest, GatewayTransactionInfo, PaymentDao, PaymentPluginApi, PaymentPluginError,
};
use crate::error::{PaymentError, Result};
use crate::infrastructure::notification_queue::InMemoryNotificationQueueService;
use crate::interfaces::csv::summary_writer::PaymentSummary;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

pub const SIMULATION_TENANT_RECORD_ID: u64 = 1;

/// What the gateway does with a call.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ScriptedCall {
    Respond(TransactionStatus),
    Error,
    Timeout,
}

/// One scripted gateway call, with the status the gateway reports for the
/// transaction afterwards when asked.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct ScriptedOutcome {
    pub call: ScriptedCall,
    pub resolution: Option<TransactionStatus>,
}

impl ScriptedOutcome {
    pub fn parse(token: &str) -> Result<Self> {
        let (call, resolution) = match token.split_once('>') {
            Some((call, resolution)) => (call.trim(), Some(parse_status(resolution.trim())?)),
            None => (token.trim(), None),
        };
        let call = match call {
            "error" => ScriptedCall::Error,
            "timeout" => ScriptedCall::Timeout,
            status => ScriptedCall::Respond(parse_status(status)?),
        };
        Ok(Self { call, resolution })
    }
}

fn parse_status(value: &str) -> Result<TransactionStatus> {
    match value {
        "success" => Ok(TransactionStatus::Success),
        "pending" => Ok(TransactionStatus::Pending),
        "failed" => Ok(TransactionStatus::Failed),
        other => Err(PaymentError::ValidationError(format!(
            "Unknown scripted outcome {}",
            other
        ))),
    }
}

/// Parses a `;`-separated outcome list such as `failed;timeout>success`.
pub fn parse_outcomes(value: &str) -> Result<Vec<ScriptedOutcome>> {
    value
        .split(';')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(ScriptedOutcome::parse)
        .collect()
}

/// A gateway answering from per-key scripts. Keys without a remaining
/// script succeed.
#[derive(Default)]
pub struct ScriptedPaymentGateway {
    scripts: Mutex<HashMap<String, VecDeque<ScriptedOutcome>>>,
    resolutions: Mutex<HashMap<Uuid, TransactionStatus>>,
}

impl ScriptedPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn script(&self, transaction_external_key: &str, outcomes: Vec<ScriptedOutcome>) {
        self.scripts
            .lock()
            .await
            .entry(transaction_external_key.to_string())
            .or_default()
            .extend(outcomes);
    }
}

#[async_trait]
impl PaymentPluginApi for ScriptedPaymentGateway {
    async fn process_payment(
        &self,
        request: &GatewayRequest,
    ) -> std::result::Result<GatewayTransactionInfo, PaymentPluginError> {
        let outcome = self
            .scripts
            .lock()
            .await
            .get_mut(&request.transaction_external_key)
            .and_then(VecDeque::pop_front)
            .unwrap_or(ScriptedOutcome {
                call: ScriptedCall::Respond(TransactionStatus::Success),
                resolution: None,
            });
        debug!(
            transaction_external_key = %request.transaction_external_key,
            ?outcome,
            "Scripted gateway call"
        );
        if let Some(resolution) = outcome.resolution {
            self.resolutions
                .lock()
                .await
                .insert(request.transaction_id, resolution);
        }

        match outcome.call {
            ScriptedCall::Respond(status) => Ok(GatewayTransactionInfo {
                status,
                processed_amount: None,
                processed_currency: None,
                gateway_error: (status == TransactionStatus::Failed)
                    .then(|| "declined".to_string()),
            }),
            ScriptedCall::Error => Err(PaymentPluginError::Failure(
                "scripted gateway error".to_string(),
            )),
            ScriptedCall::Timeout => Err(PaymentPluginError::Timeout),
        }
    }

    async fn get_payment_info(
        &self,
        transaction: &PaymentTransaction,
    ) -> std::result::Result<Option<GatewayTransactionInfo>, PaymentPluginError> {
        let resolution = self.resolutions.lock().await.get(&transaction.id).copied();
        Ok(resolution.map(|status| GatewayTransactionInfo {
            status,
            processed_amount: None,
            processed_currency: None,
            gateway_error: None,
        }))
    }
}

/// Fast-forwards the clock from one due notification to the next until no
/// notification is pending or `max_steps` is reached. Returns the number of
/// steps taken.
pub async fn run_until_idle(
    queues: &InMemoryNotificationQueueService,
    clock: &ClockMock,
    max_steps: usize,
) -> usize {
    let mut steps = 0;
    while steps < max_steps {
        let Some(next) = queues.next_effective_date().await else {
            return steps;
        };
        if next > clock.utc_now() {
            clock.set_time(next);
        }
        queues.process_ready_notifications().await;
        steps += 1;
    }
    warn!(max_steps, "Simulation stopped with notifications still pending");
    steps
}

/// Waits on the wall clock while the queues' own pollers deliver, until no
/// notification has been pending for two consecutive ticks or `timeout`
/// elapses. Returns whether the queues went idle.
pub async fn wait_until_idle(
    queues: &InMemoryNotificationQueueService,
    tick: Duration,
    timeout: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    let mut idle_ticks = 0;
    loop {
        if queues.next_effective_date().await.is_none() {
            idle_ticks += 1;
            if idle_ticks == 2 {
                return true;
            }
        } else {
            idle_ticks = 0;
        }
        if Instant::now() >= deadline {
            warn!(?timeout, "Stopped waiting with notifications still pending");
            return false;
        }
        tokio::time::sleep(tick).await;
    }
}

/// Summarizes the outcome of each key, in the given order.
pub async fn summarize(
    dao: &dyn PaymentDao,
    keys: &[(String, InternalCallContext)],
) -> Result<Vec<PaymentSummary>> {
    let mut summaries = Vec::with_capacity(keys.len());
    for (key, context) in keys {
        let transactions = dao
            .get_payment_transactions_by_external_key(key, context)
            .await?;
        let attempt = dao
            .get_payment_attempts(context.tenant_record_id)
            .await?
            .into_iter()
            .filter(|attempt| &attempt.transaction_external_key == key)
            .max_by_key(|attempt| attempt.updated_date);
        summaries.push(PaymentSummary {
            key: key.clone(),
            attempt: attempt.map_or_else(|| "-".to_string(), |a| a.state_name.to_string()),
            status: transactions
                .last()
                .map_or_else(|| "-".to_string(), |tx| tx.status.to_string()),
            transactions: transactions.len(),
        });
    }
    Ok(summaries)
}
