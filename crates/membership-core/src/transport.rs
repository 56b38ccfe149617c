//! Collaborator seams: message transport and tick source

use crate::types::{NodeAddress, Tick};
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Destination unreachable: {0}")]
    Unreachable(NodeAddress),
    #[error("Transport closed")]
    Closed,
}

/// Fire-and-forget delivery of opaque payloads.
///
/// Neither method may block: `send` either hands the payload off or fails,
/// and `receive` returns whatever has arrived since the last call.
pub trait Transport {
    fn send(&mut self, from: NodeAddress, to: NodeAddress, payload: Bytes)
        -> Result<(), TransportError>;

    /// Drain pending inbound payloads in arrival order.
    fn receive(&mut self) -> Vec<Bytes>;
}

/// Source of the current logical tick.
pub trait Clock {
    fn now(&self) -> Tick;
}

/// Tick counter advanced explicitly by whoever schedules the nodes.
///
/// Clones share the same counter.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    tick: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, tick: Tick) {
        self.tick.store(tick, Ordering::SeqCst);
    }

    /// Advance by one tick and return the new value.
    pub fn advance(&self) -> Tick {
        self.tick.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Tick {
        self.tick.load(Ordering::SeqCst)
    }
}
