//! Sequential fan-out of control plugin callbacks.
//!
//! Plugins are consulted one after the other, in the order of the attempt's
//! plugin list. Names without a registered plugin are skipped.

use crate::domain::payment::PluginProperty;
use crate::domain::plugin::{PaymentControlContext, PluginRegistry, PriorCallResult};
use chrono::{DateTime, Utc};
use tracing::warn;

/// Runs `prior_call` on every plugin. The first abort verdict wins; the last
/// adjusted amount wins. Failing plugins are skipped.
pub async fn execute_plugin_prior_calls(
    registry: &PluginRegistry,
    plugin_names: &[String],
    context: &PaymentControlContext,
    properties: &[PluginProperty],
) -> PriorCallResult {
    let mut merged = PriorCallResult::default();
    for plugin_name in plugin_names {
        let Some(plugin) = registry.get_service_for_name(plugin_name).await else {
            continue;
        };
        match plugin.prior_call(context, properties).await {
            Ok(result) => {
                if result.adjusted_amount.is_some() {
                    merged.adjusted_amount = result.adjusted_amount;
                }
                if result.is_aborted {
                    merged.is_aborted = true;
                    return merged;
                }
            }
            Err(e) => {
                warn!(
                    plugin = %plugin_name,
                    payment_external_key = %context.payment_external_key,
                    error = %e,
                    "Plugin failed to complete priorCall"
                );
            }
        }
    }
    merged
}

/// Best-effort `on_success_call` on every plugin.
pub async fn execute_plugin_on_success_calls(
    registry: &PluginRegistry,
    plugin_names: &[String],
    context: &PaymentControlContext,
    properties: &[PluginProperty],
) {
    for plugin_name in plugin_names {
        let Some(plugin) = registry.get_service_for_name(plugin_name).await else {
            continue;
        };
        if let Err(e) = plugin.on_success_call(context, properties).await {
            warn!(
                plugin = %plugin_name,
                payment_external_key = %context.payment_external_key,
                error = %e,
                "Plugin failed to complete onSuccessCall"
            );
        }
    }
}

/// Runs `on_failure_call` on every plugin and returns the earliest retry
/// date proposed.
///
/// A failing plugin ends the loop: the candidate computed so far is returned
/// and the remaining plugins are not consulted.
pub async fn execute_plugin_on_failure_calls(
    registry: &PluginRegistry,
    plugin_names: &[String],
    context: &PaymentControlContext,
    properties: &[PluginProperty],
) -> Option<DateTime<Utc>> {
    let mut candidate: Option<DateTime<Utc>> = None;
    for plugin_name in plugin_names {
        let Some(plugin) = registry.get_service_for_name(plugin_name).await else {
            continue;
        };
        match plugin.on_failure_call(context, properties).await {
            Ok(result) => {
                candidate = match (candidate, result.next_retry_date) {
                    (None, next) => next,
                    (Some(current), Some(next)) if next < current => Some(next),
                    (current, _) => current,
                };
            }
            Err(e) => {
                warn!(
                    plugin = %plugin_name,
                    payment_external_key = %context.payment_external_key,
                    error = %e,
                    "Plugin failed to return next retryDate"
                );
                return candidate;
            }
        }
    }
    candidate
}
