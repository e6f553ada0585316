use crate::error::{PaymentError, Result};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound on any configured delay, ten years.
const MAX_DELAY_SECS: u64 = 315_360_000;

/// Runtime configuration, loaded from a JSON file. Every field has a
/// default, so `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentConfig {
    pub janitor: JanitorConfig,
    pub notification_queue: NotificationQueueConfig,
    pub control_plugins: Vec<RetryPluginConfig>,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            janitor: JanitorConfig::default(),
            notification_queue: NotificationQueueConfig::default(),
            control_plugins: vec![RetryPluginConfig::default()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JanitorConfig {
    /// Delay before each reconciliation pass of an incomplete transaction.
    /// The janitor gives up once the list is exhausted.
    pub incomplete_transaction_retry_delays_secs: Vec<u64>,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            incomplete_transaction_retry_delays_secs: vec![60, 600, 3600],
        }
    }
}

impl JanitorConfig {
    pub fn retry_delays(&self) -> Vec<TimeDelta> {
        to_deltas(&self.incomplete_transaction_retry_delays_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationQueueConfig {
    /// Polling period of the background delivery loop. `None` disables it,
    /// leaving delivery to explicit `process_ready_notifications` calls.
    pub poll_interval_ms: Option<u64>,
}

impl Default for NotificationQueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: Some(1000),
        }
    }
}

impl NotificationQueueConfig {
    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_ms.map(Duration::from_millis)
    }
}

/// A retry control plugin proposing a fixed schedule of retry delays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPluginConfig {
    pub name: String,
    pub retry_delays_secs: Vec<u64>,
}

impl Default for RetryPluginConfig {
    fn default() -> Self {
        Self {
            name: "retry".to_string(),
            retry_delays_secs: vec![3600, 86400],
        }
    }
}

impl RetryPluginConfig {
    pub fn retry_delays(&self) -> Vec<TimeDelta> {
        to_deltas(&self.retry_delays_secs)
    }
}

impl PaymentConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config: PaymentConfig = serde_json::from_str(&contents).map_err(|e| {
            PaymentError::ConfigError(format!("{}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.notification_queue.poll_interval_ms == Some(0) {
            return Err(PaymentError::ConfigError(
                "notification_queue.poll_interval_ms must be positive".to_string(),
            ));
        }
        check_delays(
            "janitor.incomplete_transaction_retry_delays_secs",
            &self.janitor.incomplete_transaction_retry_delays_secs,
        )?;
        for plugin in &self.control_plugins {
            if plugin.name.trim().is_empty() {
                return Err(PaymentError::ConfigError(
                    "control plugin name must not be empty".to_string(),
                ));
            }
            check_delays(&plugin.name, &plugin.retry_delays_secs)?;
        }
        Ok(())
    }
}

fn check_delays(field: &str, delays: &[u64]) -> Result<()> {
    match delays.iter().find(|secs| **secs > MAX_DELAY_SECS) {
        Some(secs) => Err(PaymentError::ConfigError(format!(
            "{}: delay of {}s exceeds the {}s maximum",
            field, secs, MAX_DELAY_SECS
        ))),
        None => Ok(()),
    }
}

fn to_deltas(delays: &[u64]) -> Vec<TimeDelta> {
    delays
        .iter()
        .map(|secs| TimeDelta::seconds((*secs).min(MAX_DELAY_SECS) as i64))
        .collect()
}
