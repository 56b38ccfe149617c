//! Heartbeat gossip membership core
//!
//! Each node keeps its own eventually-consistent view of which peers are
//! alive. Liveness evidence is a self-incremented heartbeat, spread by
//! periodic push gossip and aged out against a shared logical tick.
//!
//! # Modules
//!
//! - [`types`]: Addresses, table rows, membership events
//! - [`table`]: Membership table and the monotonic merge rule
//! - [`codec`]: Wire encoding of join and gossip messages
//! - [`join`]: Join handshake with the introducer
//! - [`detector`]: Suspect/remove failure detection
//! - [`gossip`]: Digest construction, target selection, merging
//! - [`node`]: Per-tick protocol driver
//! - [`transport`]: Transport and clock seams
//! - [`params`]: Protocol parameters
//! - [`error`]: Error types

pub mod codec;
pub mod detector;
pub mod error;
pub mod gossip;
pub mod join;
pub mod node;
pub mod params;
pub mod table;
pub mod transport;
pub mod types;

pub use codec::{CodecError, GossipDigest, Outbound, WireMessage};
pub use error::{Error, Result};
pub use join::JoinState;
pub use node::Node;
pub use params::ProtocolParams;
pub use table::MembershipTable;
pub use transport::{Clock, ManualClock, Transport, TransportError};
pub use types::*;
