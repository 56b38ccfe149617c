//! Transports for the membership protocol
//!
//! This crate provides:
//! - An in-memory emulated network with configurable message loss
//! - A cluster harness that ticks many nodes over that network
//! - A non-blocking UDP transport

pub mod sim;
pub mod udp;

pub use sim::{Cluster, NetworkStats, SimEndpoint, SimNetwork};
pub use udp::UdpTransport;
