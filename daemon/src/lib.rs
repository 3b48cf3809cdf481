// Arena A2A Daemon Library
// Exposes internal modules for integration testing

extern crate log;

pub mod auth;
pub mod config;
pub mod payment;
pub mod providers;
pub mod rate_limit;
pub mod router;
pub mod rpc;
pub mod subscriptions;
