use crate::domain::clock::Clock;
use crate::domain::payment::PluginProperty;
use crate::domain::plugin::{ControlPlugin, OnFailureResult, PaymentControlContext, RoutingError};
use async_trait::async_trait;
use chrono::TimeDelta;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Transactions remembered after their key ran out of retries.
const EXHAUSTED_CAPACITY: usize = 1024;

/// Proposes retries on a fixed schedule of delays, per transaction external
/// key: the n-th failed transaction of a key is retried after the n-th delay.
///
/// Asking again about the same failed transaction yields the same answer.
/// A key is forgotten once it succeeds or runs out of delays.
pub struct RetrySchedulePlugin {
    clock: Arc<dyn Clock>,
    retry_delays: Vec<TimeDelta>,
    history: Mutex<FailureHistory>,
}

#[derive(Default)]
struct FailureHistory {
    failures: HashMap<String, Vec<Option<Uuid>>>,
    exhausted: VecDeque<Uuid>,
}

impl RetrySchedulePlugin {
    pub fn new(clock: Arc<dyn Clock>, retry_delays: Vec<TimeDelta>) -> Self {
        Self {
            clock,
            retry_delays,
            history: Mutex::new(FailureHistory::default()),
        }
    }

    /// Number of keys currently tracked.
    pub async fn tracked_keys(&self) -> usize {
        self.history.lock().await.failures.len()
    }
}

#[async_trait]
impl ControlPlugin for RetrySchedulePlugin {
    async fn on_success_call(
        &self,
        context: &PaymentControlContext,
        _properties: &[PluginProperty],
    ) -> Result<(), RoutingError> {
        self.history
            .lock()
            .await
            .failures
            .remove(&context.transaction_external_key);
        Ok(())
    }

    async fn on_failure_call(
        &self,
        context: &PaymentControlContext,
        _properties: &[PluginProperty],
    ) -> Result<OnFailureResult, RoutingError> {
        let mut history = self.history.lock().await;
        if let Some(transaction_id) = context.transaction_id
            && history.exhausted.contains(&transaction_id)
        {
            return Ok(OnFailureResult::no_retry());
        }

        let seen = history
            .failures
            .entry(context.transaction_external_key.clone())
            .or_default();
        let index = match seen.iter().position(|id| *id == context.transaction_id) {
            Some(index) => index,
            None => {
                seen.push(context.transaction_id);
                seen.len() - 1
            }
        };
        let Some(delay) = self.retry_delays.get(index) else {
            history.failures.remove(&context.transaction_external_key);
            if let Some(transaction_id) = context.transaction_id {
                if history.exhausted.len() == EXHAUSTED_CAPACITY {
                    history.exhausted.pop_front();
                }
                history.exhausted.push_back(transaction_id);
            }
            return Ok(OnFailureResult::no_retry());
        };
        Ok(OnFailureResult::retry_at(self.clock.utc_now() + *delay))
    }
}
