//! Domain model and the ports the payment control core depends on.

pub mod clock;
pub mod notification;
pub mod payment;
pub mod plugin;
pub mod ports;
pub mod state;
