use crate::error::{PaymentError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// States of the payment control state machine.
///
/// `Init` and `Retried` are the only states the control operation may run
/// from. `Success` and `Aborted` are terminal, although an aborted attempt can
/// still be moved to `Retried` when a plugin asks for a retry after the fact.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlState {
    Init,
    Retried,
    Success,
    Aborted,
}

/// Outcome of the control operation, as seen by the state machine.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum OperationResult {
    Success,
    Pending,
    Failure,
    Exception,
}

/// Callbacks run when a state is left, before the control operation.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum LeavingCallback {
    ControlInitiated,
}

/// Callbacks run, in order, when a state is entered.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum EnteringCallback {
    ControlCompleted,
    RetryScheduled,
}

impl ControlState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlState::Init => "INIT",
            ControlState::Retried => "RETRIED",
            ControlState::Success => "SUCCESS",
            ControlState::Aborted => "ABORTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ControlState::Success | ControlState::Aborted)
    }

    /// Destination of the control operation run from `self`.
    pub fn transition(&self, result: OperationResult, retry_requested: bool) -> Result<Self> {
        if self.is_terminal() {
            return Err(PaymentError::InvalidTransition(*self));
        }
        Ok(match result {
            OperationResult::Success | OperationResult::Pending => ControlState::Success,
            OperationResult::Failure if retry_requested => ControlState::Retried,
            OperationResult::Failure | OperationResult::Exception => ControlState::Aborted,
        })
    }

    pub fn leaving_callbacks(&self) -> &'static [LeavingCallback] {
        match self {
            ControlState::Init | ControlState::Retried => &[LeavingCallback::ControlInitiated],
            ControlState::Success | ControlState::Aborted => &[],
        }
    }

    pub fn entering_callbacks(&self) -> &'static [EnteringCallback] {
        match self {
            ControlState::Init => &[],
            ControlState::Retried => &[
                EnteringCallback::ControlCompleted,
                EnteringCallback::RetryScheduled,
            ],
            ControlState::Success | ControlState::Aborted => &[EnteringCallback::ControlCompleted],
        }
    }
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlState {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "INIT" => Ok(ControlState::Init),
            "RETRIED" => Ok(ControlState::Retried),
            "SUCCESS" => Ok(ControlState::Success),
            "ABORTED" => Ok(ControlState::Aborted),
            other => Err(PaymentError::ValidationError(format!(
                "Unknown control state {}",
                other
            ))),
        }
    }
}
