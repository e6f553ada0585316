//! Payment control orchestration: the state machine runner, its plugin
//! callbacks, the retry service and the janitor.

pub mod completion;
pub mod context;
pub mod control_calls;
pub mod janitor;
pub mod lifecycle;
pub mod retry;
pub mod runner;
pub mod service;
