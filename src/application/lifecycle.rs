use crate::error::{PaymentError, Result};
use std::fmt;
use std::future::Future;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// One-way lifecycle of a background service:
/// CREATED -> INITIALIZED -> RUNNING -> STOPPED.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum LifecycleState {
    Created,
    Initialized,
    Running,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Created => "CREATED",
            LifecycleState::Initialized => "INITIALIZED",
            LifecycleState::Running => "RUNNING",
            LifecycleState::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// Guards the lifecycle transitions of a service.
///
/// Transitions are serialized by an async mutex held for the whole
/// transition, so a `stop` racing another `stop` sees the first one's result.
/// Redundant transitions are logged no-ops, illegal ones are errors.
pub struct Lifecycle {
    service: &'static str,
    state: Mutex<LifecycleState>,
}

impl Lifecycle {
    pub fn new(service: &'static str) -> Self {
        Self {
            service,
            state: Mutex::new(LifecycleState::Created),
        }
    }

    pub async fn current(&self) -> LifecycleState {
        *self.state.lock().await
    }

    pub async fn initialize<F, Fut>(&self, init: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut state = self.state.lock().await;
        if *state != LifecycleState::Created {
            return Err(self.illegal(*state, LifecycleState::Initialized));
        }
        init().await?;
        *state = LifecycleState::Initialized;
        Ok(())
    }

    pub async fn start<F, Fut>(&self, start: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut state = self.state.lock().await;
        match *state {
            LifecycleState::Stopped => {
                warn!(
                    service = self.service,
                    "{} is not a restartable service, and was already started, aborting",
                    self.service
                );
                Ok(())
            }
            LifecycleState::Running => {
                debug!(service = self.service, "Service already running");
                Ok(())
            }
            LifecycleState::Created => Err(self.illegal(*state, LifecycleState::Running)),
            LifecycleState::Initialized => {
                start().await;
                *state = LifecycleState::Running;
                Ok(())
            }
        }
    }

    /// Runs `stop` unless already stopped. The service is marked stopped
    /// even when `stop` fails; its error is still returned.
    pub async fn stop<F, Fut>(&self, stop: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut state = self.state.lock().await;
        if *state == LifecycleState::Stopped {
            warn!(
                service = self.service,
                "{} is already in a stopped state", self.service
            );
            return Ok(());
        }
        let result = stop().await;
        *state = LifecycleState::Stopped;
        result
    }

    fn illegal(&self, from: LifecycleState, to: LifecycleState) -> PaymentError {
        PaymentError::IllegalLifecycleTransition {
            service: self.service,
            from,
            to,
        }
    }
}
