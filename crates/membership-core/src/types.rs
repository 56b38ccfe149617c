//! Core data model for the membership protocol
//!
//! Addresses, table rows, digest records and the membership events a node
//! records as its view changes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

/// Logical tick counter shared by the scheduler driving every node.
pub type Tick = u64;

/// Self-reported liveness counter.
pub type Heartbeat = u64;

// =============================================================================
// ADDRESSING
// =============================================================================

/// Network endpoint of a node: 4-byte id plus 2-byte port.
///
/// For UDP endpoints the id is the IPv4 address in network order, so an
/// address maps one-to-one onto a [`SocketAddrV4`].
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeAddress {
    pub id: u32,
    pub port: u16,
}

impl NodeAddress {
    pub const fn new(id: u32, port: u16) -> Self {
        Self { id, port }
    }
}

impl From<SocketAddrV4> for NodeAddress {
    fn from(addr: SocketAddrV4) -> Self {
        Self {
            id: u32::from(*addr.ip()),
            port: addr.port(),
        }
    }
}

impl From<NodeAddress> for SocketAddrV4 {
    fn from(addr: NodeAddress) -> Self {
        SocketAddrV4::new(Ipv4Addr::from(addr.id), addr.port)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", Ipv4Addr::from(self.id), self.port)
    }
}

// =============================================================================
// MEMBERSHIP TABLE ROWS
// =============================================================================

/// Liveness classification of a table entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberStatus {
    /// Heartbeat advanced within `t_fail` ticks
    Alive,
    /// Silent for more than `t_fail` ticks, awaiting removal
    Suspect,
}

/// One row of the membership table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberEntry {
    pub addr: NodeAddress,
    /// Highest heartbeat ever accepted for this peer
    pub heartbeat: Heartbeat,
    /// Local tick at which `heartbeat` last advanced
    pub last_updated: Tick,
    pub status: MemberStatus,
}

impl MemberEntry {
    pub fn new(addr: NodeAddress, heartbeat: Heartbeat, now: Tick) -> Self {
        Self {
            addr,
            heartbeat,
            last_updated: now,
            status: MemberStatus::Alive,
        }
    }

    pub fn id(&self) -> u32 {
        self.addr.id
    }

    pub fn port(&self) -> u16 {
        self.addr.port
    }

    /// Ticks elapsed since the heartbeat last advanced.
    pub fn silence(&self, now: Tick) -> Tick {
        now.saturating_sub(self.last_updated)
    }

    /// Whether the entry may still be gossiped and chosen as a target.
    pub fn is_live(&self, now: Tick, t_fail: Tick) -> bool {
        self.silence(now) <= t_fail
    }

    pub fn digest_entry(&self) -> DigestEntry {
        DigestEntry {
            addr: self.addr,
            heartbeat: self.heartbeat,
        }
    }
}

/// `(id, port, heartbeat)` record carried inside a gossip digest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestEntry {
    pub addr: NodeAddress,
    pub heartbeat: Heartbeat,
}

/// What a component needs to know about the local node for one step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalView {
    pub addr: NodeAddress,
    pub heartbeat: Heartbeat,
    pub now: Tick,
}

// =============================================================================
// EVENTS
// =============================================================================

/// Changes to a node's membership view, recorded in arrival order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipEvent {
    /// This node entered the group
    Joined { at: Tick },
    /// A previously unknown peer was inserted
    MemberAdded { addr: NodeAddress, at: Tick },
    /// A peer stopped advancing its heartbeat for more than `t_fail` ticks
    MemberSuspected { addr: NodeAddress, at: Tick },
    /// A suspected peer's heartbeat advanced again
    MemberRecovered { addr: NodeAddress, at: Tick },
    /// A peer was silent for more than `t_remove` ticks and was deleted
    MemberRemoved { addr: NodeAddress, at: Tick },
}

impl MembershipEvent {
    pub fn at(&self) -> Tick {
        match self {
            Self::Joined { at }
            | Self::MemberAdded { at, .. }
            | Self::MemberSuspected { at, .. }
            | Self::MemberRecovered { at, .. }
            | Self::MemberRemoved { at, .. } => *at,
        }
    }
}
