//! HostGuard daemon: CPU ranking, threshold alerts and safeguarded termination

pub mod alert;
pub mod cache;
pub mod config;
pub mod error;
pub mod history;
pub mod inspector;
pub mod protocol;
pub mod safeguard;
pub mod sampler;
pub mod service;
pub mod socket;
pub mod watchdog;
