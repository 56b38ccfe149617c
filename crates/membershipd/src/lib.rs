//! membershipd - heartbeat gossip membership daemon
//!
//! Runs a single group member over UDP, ticking on a fixed interval.

pub mod config;
pub mod service;

pub use config::Config;
